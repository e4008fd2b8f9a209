use crate::archive::{ArchiveHandle, ArchiveSource};
use crate::catalog::{overlay_path, VersionCatalog};
use crate::classfile::{ModuleDescriptor, MODULE_INFO_CLASS};
use crate::compliance::Compliance;
use crate::index::{IndexLayout, PackageIndexer};
use crate::jar::{ClassAnswer, ClassLookup, ClasspathJar, DiagnosticsSnapshot, EntryOrigin, JarContents};
use crate::location::ClasspathLocation;
use std::sync::Arc;
use tracing::debug;

/// JAR whose `META-INF/versions/<n>/` overlays shadow base-tree classes for
/// targets at release `n` or newer.
#[derive(Debug)]
pub struct MultiReleaseJar {
    jar: ClasspathJar,
    catalog: VersionCatalog,
}

impl MultiReleaseJar {
    pub fn new(source: Arc<dyn ArchiveSource>, compliance: Compliance) -> Self {
        Self {
            jar: ClasspathJar::new(source),
            catalog: VersionCatalog::new(compliance),
        }
    }

    pub fn compliance(&self) -> &Compliance {
        self.catalog.compliance()
    }

    /// Overlay versions visible at the configured compliance, newest first.
    ///
    /// An archive that cannot be opened reports no versions; that outcome is
    /// not cached, so a later call retries.
    pub fn supported_versions(&self) -> &[u16] {
        if let Some(versions) = self.catalog.cached() {
            return versions;
        }
        match self.jar.open() {
            Some(mut handle) => self.catalog.versions(&mut handle),
            None => &[],
        }
    }

    fn indexed(&self) -> Arc<JarContents> {
        self.jar
            .contents()
            .unwrap_or_else(|| self.build_package_index())
    }

    /// Walks the overlays newest first and returns the first one that holds a
    /// decodable body for the lookup.
    fn find_overlay_class(
        &self,
        handle: &mut ArchiveHandle,
        lookup: &ClassLookup<'_>,
        archive_module: Option<&str>,
    ) -> Option<ClassAnswer> {
        for &version in self.catalog.versions(handle) {
            let entry = overlay_path(version, lookup.qualified_binary_file_name);
            match self.jar.decode_class(
                handle,
                &entry,
                lookup,
                EntryOrigin::Overlay(version),
                archive_module,
            ) {
                Ok(Some(answer)) => {
                    debug!(
                        target: "jv::classpath",
                        location = handle.location(),
                        entry = %entry,
                        "resolved class from multi-release overlay"
                    );
                    return Some(answer);
                }
                Ok(None) => {}
                Err(error) => self.jar.report(&error),
            }
        }
        None
    }

    fn find_overlay_module(&self, handle: &mut ArchiveHandle) -> Option<ModuleDescriptor> {
        for &version in self.catalog.versions(handle) {
            match self
                .jar
                .decode_module(handle, &overlay_path(version, MODULE_INFO_CLASS))
            {
                Ok(Some(module)) => return Some(module),
                Ok(None) => {}
                Err(error) => self.jar.report(&error),
            }
        }
        None
    }
}

impl ClasspathLocation for MultiReleaseJar {
    fn location(&self) -> String {
        self.jar.location()
    }

    fn build_package_index(&self) -> Arc<JarContents> {
        let packages = PackageIndexer::new(IndexLayout::MultiRelease).index(self.jar.source());
        self.jar
            .finish_index(packages, || self.initialize_module_descriptor())
    }

    fn initialize_module_descriptor(&self) -> Option<ModuleDescriptor> {
        let mut handle = self.jar.open()?;
        self.find_overlay_module(&mut handle)
            .or_else(|| self.jar.base_module(&mut handle))
    }

    fn find_class(&self, lookup: &ClassLookup<'_>) -> Option<ClassAnswer> {
        let contents = self.indexed();
        if !self.jar.accepts(&contents, lookup) {
            // most common case
            return None;
        }

        let archive_module = contents.module_name();
        let overlay = self
            .jar
            .open()
            .and_then(|mut handle| self.find_overlay_class(&mut handle, lookup, archive_module));
        overlay.or_else(|| self.jar.find_base_class(lookup, archive_module))
    }

    fn is_package(&self, qualified_package_name: &str, module_name: Option<&str>) -> bool {
        self.indexed()
            .is_package(qualified_package_name, module_name)
    }

    fn module(&self) -> Option<ModuleDescriptor> {
        self.indexed().module.clone()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.jar.diagnostics()
    }
}
