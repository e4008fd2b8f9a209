use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub const CLASS_SUFFIX: &str = ".class";
pub const MODULE_INFO_CLASS: &str = "module-info.class";

const ACC_OPEN: u16 = 0x0020;

#[derive(Debug, Error)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid modified UTF-8 string in constant pool at byte {offset}")]
    Utf8Decode { offset: usize },
    #[error("module-info missing Module attribute")]
    MissingModuleAttribute,
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
}

/// Structural view of a decoded class file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryType {
    /// Internal name, e.g. `com/example/Foo`.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub major_version: u16,
    pub minor_version: u16,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    /// Module the type belongs to. Decoding never fills this in; the
    /// classpath entry stamps its own module name when it is absent.
    pub module_name: Option<String>,
}

impl BinaryType {
    pub fn fqcn(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Internal package name (`com/example`), empty for the default package.
    pub fn package(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map(|(pkg, _)| pkg)
            .unwrap_or("")
    }

    pub fn field(&self, name: &str) -> Option<&MemberInfo> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
}

/// Declaration carried by a `module-info.class`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: Option<String>,
    pub open: bool,
    pub requires: BTreeSet<String>,
    pub exports: Vec<PackageExport>,
    pub opens: Vec<PackageExport>,
    pub uses: BTreeSet<String>,
    pub provides: Vec<ServiceProvision>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when `package` (dotted form) is exported to every module.
    pub fn exports_package(&self, package: &str) -> bool {
        self.exports
            .iter()
            .any(|export| export.package == package && export.targets.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageExport {
    /// Dotted package name.
    pub package: String,
    /// Qualified targets; empty means unqualified.
    pub targets: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProvision {
    pub service: String,
    pub implementations: Vec<String>,
}

pub fn parse_class(bytes: &[u8]) -> Result<BinaryType, ClassParseError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    let constant_pool = ConstantPool::parse(&mut reader)?;

    let access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;

    let interfaces_count = reader.read_u2()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        let index = reader.read_u2()?;
        interfaces.push(constant_pool.class_name(index)?);
    }

    let fields = read_members(&mut reader, &constant_pool)?;
    let methods = read_members(&mut reader, &constant_pool)?;

    let attributes_count = reader.read_u2()?;
    skip_attributes(&mut reader, attributes_count)?;
    reader.expect_end()?;

    let name = constant_pool.class_name(this_class)?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(constant_pool.class_name(super_class)?)
    };

    Ok(BinaryType {
        name,
        super_name,
        interfaces,
        access_flags,
        major_version,
        minor_version,
        fields,
        methods,
        module_name: None,
    })
}

pub fn parse_module_info(bytes: &[u8]) -> Result<ModuleDescriptor, ClassParseError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let constant_pool = ConstantPool::parse(&mut reader)?;

    let _access_flags = reader.read_u2()?;
    let _this_class = reader.read_u2()?;
    let _super_class = reader.read_u2()?;
    let interfaces_count = reader.read_u2()?;
    reader.skip(interfaces_count as usize * 2)?;

    let fields = reader.read_u2()?;
    for _ in 0..fields {
        skip_member(&mut reader)?;
    }

    let methods = reader.read_u2()?;
    for _ in 0..methods {
        skip_member(&mut reader)?;
    }

    let attributes_count = reader.read_u2()?;
    let mut descriptor: Option<ModuleDescriptor> = None;
    for _ in 0..attributes_count {
        let attribute_name_index = reader.read_u2()?;
        let attribute_length = reader.read_u4()? as usize;
        let attribute_name = constant_pool.utf8(attribute_name_index)?;
        if attribute_name == "Module" {
            let slice = reader.read_slice(attribute_length)?;
            descriptor = Some(parse_module_attribute(slice, &constant_pool)?);
        } else {
            reader.skip(attribute_length)?;
        }
    }

    descriptor.ok_or(ClassParseError::MissingModuleAttribute)
}

fn parse_module_attribute(
    slice: &[u8],
    constant_pool: &ConstantPool,
) -> Result<ModuleDescriptor, ClassParseError> {
    let mut reader = ClassReader::new(slice);
    let module_name_index = reader.read_u2()?;
    let module_flags = reader.read_u2()?;
    let module_version_index = reader.read_u2()?;

    let mut descriptor = ModuleDescriptor::new(constant_pool.module_name(module_name_index)?);
    descriptor.open = module_flags & ACC_OPEN != 0;
    if module_version_index != 0 {
        descriptor.version = Some(constant_pool.utf8(module_version_index)?.to_string());
    }

    let requires_count = reader.read_u2()?;
    for _ in 0..requires_count {
        let requires_index = reader.read_u2()?;
        reader.read_u2()?; // requires_flags
        reader.read_u2()?; // requires_version_index
        descriptor
            .requires
            .insert(constant_pool.module_name(requires_index)?);
    }

    let exports_count = reader.read_u2()?;
    for _ in 0..exports_count {
        descriptor
            .exports
            .push(read_package_export(&mut reader, constant_pool)?);
    }

    let opens_count = reader.read_u2()?;
    for _ in 0..opens_count {
        descriptor
            .opens
            .push(read_package_export(&mut reader, constant_pool)?);
    }

    let uses_count = reader.read_u2()?;
    for _ in 0..uses_count {
        let index = reader.read_u2()?;
        descriptor
            .uses
            .insert(constant_pool.class_name(index)?.replace('/', "."));
    }

    let provides_count = reader.read_u2()?;
    for _ in 0..provides_count {
        let provides_index = reader.read_u2()?;
        let impl_count = reader.read_u2()?;
        let mut implementations = Vec::with_capacity(impl_count as usize);
        for _ in 0..impl_count {
            let index = reader.read_u2()?;
            implementations.push(constant_pool.class_name(index)?.replace('/', "."));
        }
        descriptor.provides.push(ServiceProvision {
            service: constant_pool.class_name(provides_index)?.replace('/', "."),
            implementations,
        });
    }

    Ok(descriptor)
}

fn read_package_export(
    reader: &mut ClassReader<'_>,
    constant_pool: &ConstantPool,
) -> Result<PackageExport, ClassParseError> {
    let package_index = reader.read_u2()?;
    reader.read_u2()?; // flags
    let targets_count = reader.read_u2()?;
    let mut targets = BTreeSet::new();
    for _ in 0..targets_count {
        let index = reader.read_u2()?;
        targets.insert(constant_pool.module_name(index)?);
    }

    Ok(PackageExport {
        package: constant_pool.package_name(package_index)?.replace('/', "."),
        targets,
    })
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class { name_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    Other,
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut ClassReader<'_>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable); // index 0 unused

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(decode_modified_utf8(bytes)?)
                }
                3 | 4 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    // long/double occupy two slots
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                8 | 16 => {
                    reader.skip(2)?;
                    Constant::Other
                }
                9..=12 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                19 => Constant::Module {
                    name_index: reader.read_u2()?,
                },
                20 => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };

            entries.push(entry);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant, ClassParseError> {
        self.entries
            .get(index as usize)
            .ok_or(ClassParseError::InvalidConstantIndex { index })
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    fn class_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Class { name_index } => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    fn package_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Package { name_index } => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    fn module_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Module { name_index } => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }
}

struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn expect_magic(&mut self) -> Result<(), ClassParseError> {
        const MAGIC: u32 = 0xCAFEBABE;
        if self.read_u4()? != MAGIC {
            return Err(ClassParseError::InvalidMagic);
        }
        Ok(())
    }

    fn expect_end(&self) -> Result<(), ClassParseError> {
        let remaining = self.data.len() - self.pos;
        if remaining != 0 {
            return Err(ClassParseError::TrailingBytes(remaining));
        }
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, ClassParseError> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or(ClassParseError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_u2(&mut self) -> Result<u16, ClassParseError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassParseError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ClassParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassParseError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), ClassParseError> {
        self.read_slice(len).map(|_| ())
    }
}

fn read_members(
    reader: &mut ClassReader<'_>,
    constant_pool: &ConstantPool,
) -> Result<Vec<MemberInfo>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name_index = reader.read_u2()?;
        let descriptor_index = reader.read_u2()?;
        let attributes_count = reader.read_u2()?;
        members.push(MemberInfo {
            name: constant_pool.utf8(name_index)?.to_string(),
            descriptor: constant_pool.utf8(descriptor_index)?.to_string(),
            access_flags,
        });
        skip_attributes(reader, attributes_count)?;
    }
    Ok(members)
}

fn skip_attributes(reader: &mut ClassReader<'_>, count: u16) -> Result<(), ClassParseError> {
    for _ in 0..count {
        reader.read_u2()?; // attribute_name_index
        let length = reader.read_u4()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

/// Decodes a `CONSTANT_Utf8` payload. Class files use modified UTF-8: NUL is
/// written as `C0 80` and supplementary characters as surrogate pairs.
fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassParseError> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_owned());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut offset = 0;
    while offset < bytes.len() {
        let lead = bytes[offset];
        let (unit, width) = match lead {
            0x01..=0x7F => (u16::from(lead), 1),
            0xC0..=0xDF => {
                let low = continuation(bytes, offset + 1)?;
                ((u16::from(lead & 0x1F) << 6) | low, 2)
            }
            0xE0..=0xEF => {
                let mid = continuation(bytes, offset + 1)?;
                let low = continuation(bytes, offset + 2)?;
                ((u16::from(lead & 0x0F) << 12) | (mid << 6) | low, 3)
            }
            _ => return Err(ClassParseError::Utf8Decode { offset }),
        };
        units.push(unit);
        offset += width;
    }

    // lone surrogates are legal in Java strings but not in Rust ones
    Ok(char::decode_utf16(units)
        .map(|decoded| decoded.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn continuation(bytes: &[u8], offset: usize) -> Result<u16, ClassParseError> {
    match bytes.get(offset) {
        Some(&byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        _ => Err(ClassParseError::Utf8Decode { offset }),
    }
}

fn skip_member(reader: &mut ClassReader<'_>) -> Result<(), ClassParseError> {
    reader.skip(6)?; // access_flags, name_index, descriptor_index
    let attributes_count = reader.read_u2()?;
    skip_attributes(reader, attributes_count)
}
