use crate::archive::ArchiveSource;
use crate::classfile::ModuleDescriptor;
use crate::config::ClasspathConfig;
use crate::jar::{ClassAnswer, ClassLookup, ClasspathJar, DiagnosticsSnapshot, JarContents};
use crate::manifest::Manifest;
use crate::multi_release::MultiReleaseJar;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Operations the name environment issues against one classpath entry.
///
/// None of these fail: unreadable archives and malformed entries are logged,
/// counted in [`ClasspathLocation::diagnostics`] and reported as absent.
pub trait ClasspathLocation: fmt::Debug + Send + Sync {
    fn location(&self) -> String;

    /// Re-indexes the archive and installs the result, replacing any
    /// previous index.
    fn build_package_index(&self) -> Arc<JarContents>;

    /// Searches the archive for its module descriptor.
    fn initialize_module_descriptor(&self) -> Option<ModuleDescriptor>;

    fn find_class(&self, lookup: &ClassLookup<'_>) -> Option<ClassAnswer>;

    /// `qualified_package_name` uses `/` separators; the default package is
    /// the empty string.
    fn is_package(&self, qualified_package_name: &str, module_name: Option<&str>) -> bool;

    /// Module descriptor installed by the last index pass.
    fn module(&self) -> Option<ModuleDescriptor>;

    fn diagnostics(&self) -> DiagnosticsSnapshot;
}

/// Builds the classpath entry for a library archive.
///
/// Targets from release 9 on get a [`MultiReleaseJar`]; older targets cannot
/// see overlays and get a plain [`ClasspathJar`].
pub fn for_library(
    source: Arc<dyn ArchiveSource>,
    config: &ClasspathConfig,
) -> Box<dyn ClasspathLocation> {
    if !config.compliance.supports_multi_release() {
        return Box::new(ClasspathJar::new(source));
    }

    if config.require_multi_release_manifest && !declares_multi_release(source.as_ref()) {
        debug!(
            target: "jv::classpath",
            location = %source.location(),
            "manifest does not declare Multi-Release, using base tree only"
        );
        return Box::new(ClasspathJar::new(source));
    }

    Box::new(MultiReleaseJar::new(source, config.compliance.clone()))
}

fn declares_multi_release(source: &dyn ArchiveSource) -> bool {
    source
        .open()
        .ok()
        .and_then(|mut handle| Manifest::read(&mut handle))
        .map(|manifest| manifest.is_multi_release())
        .unwrap_or(false)
}
