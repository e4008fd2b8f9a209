#![allow(dead_code)]

use jv_classpath::archive::ZipReader;
use jv_classpath::{ArchiveError, ArchiveHandle, ArchiveReader, ArchiveSource, MemoryArchive};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zip::write::FileOptions;

struct ConstantPool {
    bytes: Vec<u8>,
    count: u16,
}

impl ConstantPool {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            count: 1,
        }
    }

    fn utf8(&mut self, value: &str) -> u16 {
        self.bytes.push(1);
        self.bytes
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self.next()
    }

    fn named(&mut self, tag: u8, value: &str) -> u16 {
        let name_index = self.utf8(value);
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&name_index.to_be_bytes());
        self.next()
    }

    fn next(&mut self) -> u16 {
        let index = self.count;
        self.count += 1;
        index
    }

    fn header(self, major: u16) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00];
        out.extend_from_slice(&major.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }
}

fn push_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Minimal class file for `internal_name` with one static int field named
/// `marker`, so tests can tell bodies apart.
pub fn class_bytes(internal_name: &str, major: u16, marker: &str) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let this_class = pool.named(7, internal_name);
    let super_class = pool.named(7, "java/lang/Object");
    let field_name = pool.utf8(marker);
    let field_descriptor = pool.utf8("I");

    let mut out = pool.header(major);
    push_u2(&mut out, 0x0021); // public super
    push_u2(&mut out, this_class);
    push_u2(&mut out, super_class);
    push_u2(&mut out, 0); // interfaces
    push_u2(&mut out, 1); // fields
    push_u2(&mut out, 0x0019);
    push_u2(&mut out, field_name);
    push_u2(&mut out, field_descriptor);
    push_u2(&mut out, 0);
    push_u2(&mut out, 0); // methods
    push_u2(&mut out, 0); // attributes
    out
}

/// `module-info.class` declaring `name` and exporting `exports`
/// (internal package names).
pub fn module_info_bytes(name: &str, exports: &[&str]) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let this_class = pool.named(7, "module-info");
    let attribute_name = pool.utf8("Module");
    let module = pool.named(19, name);
    let packages: Vec<u16> = exports.iter().map(|pkg| pool.named(20, pkg)).collect();

    let mut attribute = Vec::new();
    push_u2(&mut attribute, module);
    push_u2(&mut attribute, 0); // flags
    push_u2(&mut attribute, 0); // version
    push_u2(&mut attribute, 0); // requires
    push_u2(&mut attribute, packages.len() as u16);
    for package in packages {
        push_u2(&mut attribute, package);
        push_u2(&mut attribute, 0);
        push_u2(&mut attribute, 0);
    }
    push_u2(&mut attribute, 0); // opens
    push_u2(&mut attribute, 0); // uses
    push_u2(&mut attribute, 0); // provides

    let mut out = pool.header(53);
    push_u2(&mut out, 0x8000);
    push_u2(&mut out, this_class);
    push_u2(&mut out, 0);
    push_u2(&mut out, 0);
    push_u2(&mut out, 0);
    push_u2(&mut out, 0);
    push_u2(&mut out, 1);
    push_u2(&mut out, attribute_name);
    out.extend_from_slice(&(attribute.len() as u32).to_be_bytes());
    out.extend_from_slice(&attribute);
    out
}

/// Builds JAR bytes entry by entry, in the order given.
pub struct JarBuilder {
    writer: zip::ZipWriter<Cursor<Vec<u8>>>,
}

impl JarBuilder {
    pub fn new() -> Self {
        Self {
            writer: zip::ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.writer
            .add_directory(name, FileOptions::default())
            .expect("add directory");
        self
    }

    pub fn entry(mut self, name: &str, bytes: &[u8]) -> Self {
        self.writer
            .start_file(name, FileOptions::default())
            .expect("start entry");
        self.writer.write_all(bytes).expect("write entry");
        self
    }

    pub fn manifest(self, content: &str) -> Self {
        self.entry("META-INF/MANIFEST.MF", content.as_bytes())
    }

    /// Adds `path` (e.g. `pkg/Foo.class`) with a body carrying `marker`.
    pub fn class(self, path: &str, major: u16, marker: &str) -> Self {
        let internal_name = path.strip_suffix(".class").unwrap_or(path);
        let bytes = class_bytes(internal_name, major, marker);
        self.entry(path, &bytes)
    }

    pub fn overlay_class(self, version: u16, path: &str, marker: &str) -> Self {
        let internal_name = path.strip_suffix(".class").unwrap_or(path);
        let bytes = class_bytes(internal_name, version + 44, marker);
        self.entry(&format!("META-INF/versions/{version}/{path}"), &bytes)
    }

    pub fn bytes(mut self) -> Vec<u8> {
        self.writer.finish().expect("finish jar").into_inner()
    }

    pub fn memory(self, name: &str) -> Arc<dyn ArchiveSource> {
        Arc::new(MemoryArchive::new(name, self.bytes()))
    }

    pub fn counting(self, name: &str) -> Arc<CountingArchive> {
        Arc::new(CountingArchive::new(name, self.bytes()))
    }

    pub fn write_to(self, path: &Path) {
        fs::write(path, self.bytes()).expect("write jar");
    }
}

/// In-memory archive that records how many handles were opened and how many
/// are still alive.
#[derive(Debug)]
pub struct CountingArchive {
    name: String,
    bytes: Arc<[u8]>,
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl CountingArchive {
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            bytes: bytes.into(),
            opened: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for CountingArchive {
    fn open(&self) -> Result<ArchiveHandle, ArchiveError> {
        let inner = ZipReader::new(self.name.clone(), Cursor::new(Arc::clone(&self.bytes)))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let reader = CountingReader {
            inner,
            live: Arc::clone(&self.live),
        };
        Ok(ArchiveHandle::new(self.name.clone(), Box::new(reader)))
    }

    fn location(&self) -> String {
        self.name.clone()
    }
}

struct CountingReader {
    inner: ZipReader<Cursor<Arc<[u8]>>>,
    live: Arc<AtomicUsize>,
}

impl ArchiveReader for CountingReader {
    fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        self.inner.entry_names()
    }

    fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.inner.read_entry(name)
    }
}

impl Drop for CountingReader {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single stored, empty entry whose central-directory record claims a zip64
/// uncompressed size of `u64::MAX`.
pub fn oversized_zip64_entry(name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let mut out = Vec::new();

    // local file header
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    for field in [20u16, 0, 0, 0, 0] {
        out.extend_from_slice(&field.to_le_bytes()); // version, flags, method, time, date
    }
    out.extend_from_slice(&0u32.to_le_bytes()); // crc32 of no bytes
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name);

    let directory_offset = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    for field in [45u16, 45, 0, 0, 0, 0] {
        out.extend_from_slice(&field.to_le_bytes()); // made by, needed, flags, method, time, date
    }
    out.extend_from_slice(&0u32.to_le_bytes()); // crc32
    out.extend_from_slice(&0u32.to_le_bytes()); // compressed size
    out.extend_from_slice(&u32::MAX.to_le_bytes()); // uncompressed size lives in zip64 extra
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&12u16.to_le_bytes()); // extra length
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
    out.extend_from_slice(&0u16.to_le_bytes()); // disk
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name);
    out.extend_from_slice(&0x0001u16.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&u64::MAX.to_le_bytes());
    let directory_size = out.len() as u32 - directory_offset;

    // end of central directory
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&directory_size.to_le_bytes());
    out.extend_from_slice(&directory_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
