use crate::archive::{entry_display, ArchiveError, ArchiveHandle, ArchiveSource};
use crate::classfile::{
    parse_class, parse_module_info, BinaryType, ClassParseError, ModuleDescriptor, CLASS_SUFFIX,
    MODULE_INFO_CLASS,
};
use crate::index::{IndexLayout, IndexStatus, PackageIndex, PackageIndexer};
use crate::location::ClasspathLocation;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

/// Failure while probing a single archive entry.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("malformed class file {entry}: {source}")]
    Malformed {
        entry: String,
        #[source]
        source: ClassParseError,
    },
}

/// Where a resolved class body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    Base,
    Overlay(u16),
}

/// A class lookup as issued by the name environment.
#[derive(Clone, Copy)]
pub struct ClassLookup<'a> {
    /// Member file name, e.g. `Foo.class`.
    pub binary_file_name: &'a str,
    /// Package in internal form, e.g. `com/example`.
    pub qualified_package_name: &'a str,
    /// Module the caller expects the class to live in.
    pub module_name: Option<&'a str>,
    /// Path of the class in the base tree, e.g. `com/example/Foo.class`.
    pub qualified_binary_file_name: &'a str,
    pub module_name_filter: Option<&'a dyn Fn(&str) -> bool>,
}

impl<'a> ClassLookup<'a> {
    pub fn new(qualified_binary_file_name: &'a str) -> Self {
        let (qualified_package_name, binary_file_name) = qualified_binary_file_name
            .rsplit_once('/')
            .unwrap_or(("", qualified_binary_file_name));
        Self {
            binary_file_name,
            qualified_package_name,
            module_name: None,
            qualified_binary_file_name,
            module_name_filter: None,
        }
    }

    pub fn in_module(mut self, module_name: &'a str) -> Self {
        self.module_name = Some(module_name);
        self
    }

    pub fn with_module_filter(mut self, filter: &'a dyn Fn(&str) -> bool) -> Self {
        self.module_name_filter = Some(filter);
        self
    }

    /// Qualified binary name without the `.class` suffix.
    pub fn type_name(&self) -> &'a str {
        self.qualified_binary_file_name
            .strip_suffix(CLASS_SUFFIX)
            .unwrap_or(self.qualified_binary_file_name)
    }
}

impl fmt::Debug for ClassLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLookup")
            .field("binary_file_name", &self.binary_file_name)
            .field("qualified_package_name", &self.qualified_package_name)
            .field("module_name", &self.module_name)
            .field("qualified_binary_file_name", &self.qualified_binary_file_name)
            .field("module_name_filter", &self.module_name_filter.is_some())
            .finish()
    }
}

/// Successful class resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassAnswer {
    pub type_name: String,
    pub binary_type: BinaryType,
    pub module_name: Option<String>,
    pub origin: EntryOrigin,
}

impl ClassAnswer {
    /// A module name declared by the decoded type wins over the archive's.
    pub fn new(
        type_name: impl Into<String>,
        mut binary_type: BinaryType,
        archive_module: Option<&str>,
        origin: EntryOrigin,
    ) -> Self {
        if binary_type.module_name.is_none() {
            binary_type.module_name = archive_module.map(str::to_owned);
        }
        let module_name = binary_type.module_name.clone();
        Self {
            type_name: type_name.into(),
            binary_type,
            module_name,
            origin,
        }
    }
}

/// Result of indexing an archive. Replaced as a whole on every re-index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarContents {
    pub packages: PackageIndex,
    pub module: Option<ModuleDescriptor>,
}

impl JarContents {
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_ref().map(|module| module.name.as_str())
    }

    pub fn is_package(&self, qualified_package_name: &str, module_name: Option<&str>) -> bool {
        if let Some(requested) = module_name {
            if self.module_name() != Some(requested) {
                return false;
            }
        }
        self.packages.contains(qualified_package_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub archive_opens: u64,
    pub decode_failures: u64,
    pub access_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    archive_opens: AtomicU64,
    decode_failures: AtomicU64,
    access_failures: AtomicU64,
}

impl Diagnostics {
    fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            archive_opens: self.archive_opens.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            access_failures: self.access_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain JAR on the classpath.
///
/// Also serves as the building block for [`crate::MultiReleaseJar`], which
/// delegates base-tree lookups, handle management and the installed contents
/// to it.
pub struct ClasspathJar {
    source: Arc<dyn ArchiveSource>,
    contents: RwLock<Option<Arc<JarContents>>>,
    diagnostics: Diagnostics,
}

impl ClasspathJar {
    pub fn new(source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            source,
            contents: RwLock::new(None),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn source(&self) -> &dyn ArchiveSource {
        self.source.as_ref()
    }

    /// Contents installed by the last index pass, if any.
    pub fn contents(&self) -> Option<Arc<JarContents>> {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn install(&self, contents: JarContents) -> Arc<JarContents> {
        let contents = Arc::new(contents);
        *self.contents.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&contents));
        contents
    }

    /// Installs freshly indexed packages, loading the module descriptor
    /// through `load_module` when the index saw one.
    pub(crate) fn finish_index(
        &self,
        packages: PackageIndex,
        load_module: impl FnOnce() -> Option<ModuleDescriptor>,
    ) -> Arc<JarContents> {
        if packages.status() == IndexStatus::Unreadable {
            self.diagnostics
                .access_failures
                .fetch_add(1, Ordering::Relaxed);
        }
        let module = match packages.module_info_candidate() {
            Some(_) => load_module(),
            None => None,
        };
        self.install(JarContents { packages, module })
    }

    /// Opens a handle, logging and counting the failure when that is not
    /// possible.
    pub(crate) fn open(&self) -> Option<ArchiveHandle> {
        self.diagnostics.archive_opens.fetch_add(1, Ordering::Relaxed);
        match self.source.open() {
            Ok(handle) => Some(handle),
            Err(error) => {
                self.diagnostics
                    .access_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "jv::classpath",
                    location = %self.source.location(),
                    %error,
                    "failed to open archive"
                );
                None
            }
        }
    }

    pub(crate) fn report(&self, error: &EntryError) {
        let counter = match error {
            EntryError::Malformed { .. } => &self.diagnostics.decode_failures,
            EntryError::Archive(_) => &self.diagnostics.access_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "jv::classpath",
            location = %self.source.location(),
            %error,
            "treating unreadable entry as missing"
        );
    }

    /// Package and module-filter pre-check shared by every lookup.
    pub(crate) fn accepts(&self, contents: &JarContents, lookup: &ClassLookup<'_>) -> bool {
        if !contents.is_package(lookup.qualified_package_name, lookup.module_name) {
            return false;
        }
        match (lookup.module_name_filter, contents.module_name()) {
            (Some(filter), Some(name)) => filter(name),
            _ => true,
        }
    }

    pub(crate) fn decode_class(
        &self,
        handle: &mut ArchiveHandle,
        entry: &str,
        lookup: &ClassLookup<'_>,
        origin: EntryOrigin,
        archive_module: Option<&str>,
    ) -> Result<Option<ClassAnswer>, EntryError> {
        let Some(bytes) = handle.read_entry(entry)? else {
            return Ok(None);
        };
        let binary_type = parse_class(&bytes).map_err(|source| EntryError::Malformed {
            entry: entry_display(handle.location(), entry),
            source,
        })?;
        Ok(Some(ClassAnswer::new(
            lookup.type_name(),
            binary_type,
            archive_module,
            origin,
        )))
    }

    pub(crate) fn decode_module(
        &self,
        handle: &mut ArchiveHandle,
        entry: &str,
    ) -> Result<Option<ModuleDescriptor>, EntryError> {
        let Some(bytes) = handle.read_entry(entry)? else {
            return Ok(None);
        };
        parse_module_info(&bytes)
            .map(Some)
            .map_err(|source| EntryError::Malformed {
                entry: entry_display(handle.location(), entry),
                source,
            })
    }

    /// Base-tree module descriptor, `None` when absent or unreadable.
    pub(crate) fn base_module(&self, handle: &mut ArchiveHandle) -> Option<ModuleDescriptor> {
        self.decode_module(handle, MODULE_INFO_CLASS)
            .unwrap_or_else(|error| {
                self.report(&error);
                None
            })
    }

    /// Reads the class from the base tree without the package pre-check.
    pub(crate) fn find_base_class(
        &self,
        lookup: &ClassLookup<'_>,
        archive_module: Option<&str>,
    ) -> Option<ClassAnswer> {
        let mut handle = self.open()?;
        self.decode_class(
            &mut handle,
            lookup.qualified_binary_file_name,
            lookup,
            EntryOrigin::Base,
            archive_module,
        )
        .unwrap_or_else(|error| {
            self.report(&error);
            None
        })
    }

    fn indexed(&self) -> Arc<JarContents> {
        self.contents()
            .unwrap_or_else(|| self.build_package_index())
    }
}

impl ClasspathLocation for ClasspathJar {
    fn location(&self) -> String {
        self.source.location()
    }

    fn build_package_index(&self) -> Arc<JarContents> {
        let packages = PackageIndexer::new(IndexLayout::Flat).index(self.source());
        self.finish_index(packages, || self.initialize_module_descriptor())
    }

    fn initialize_module_descriptor(&self) -> Option<ModuleDescriptor> {
        let mut handle = self.open()?;
        self.base_module(&mut handle)
    }

    fn find_class(&self, lookup: &ClassLookup<'_>) -> Option<ClassAnswer> {
        let contents = self.indexed();
        if !self.accepts(&contents, lookup) {
            return None;
        }
        self.find_base_class(lookup, contents.module_name())
    }

    fn is_package(&self, qualified_package_name: &str, module_name: Option<&str>) -> bool {
        self.indexed().is_package(qualified_package_name, module_name)
    }

    fn module(&self) -> Option<ModuleDescriptor> {
        self.indexed().module.clone()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl fmt::Debug for ClasspathJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClasspathJar")
            .field("source", &self.source)
            .field("indexed", &self.contents().is_some())
            .finish()
    }
}
