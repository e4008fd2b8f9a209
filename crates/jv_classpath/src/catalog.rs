use crate::archive::ArchiveHandle;
use crate::compliance::{Compliance, MULTI_RELEASE_FLOOR};
use once_cell::race::OnceBox;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Root of the version-scoped overlays inside a multi-release JAR.
pub const VERSIONS_ROOT: &str = "META-INF/versions/";

/// Path of `entry` inside the overlay for `version`.
pub fn overlay_path(version: u16, entry: &str) -> String {
    format!("{VERSIONS_ROOT}{version}/{entry}")
}

/// Overlay versions visible at a given compliance, newest first.
///
/// The list is computed the first time an open archive is presented and kept
/// for the lifetime of the catalog. The computation only depends on the
/// archive contents and the compliance level, so two threads racing to fill
/// the cell produce the same list; whichever store lands first is kept and
/// the other is dropped. No lock is taken.
pub struct VersionCatalog {
    compliance: Compliance,
    versions: OnceBox<Vec<u16>>,
}

impl VersionCatalog {
    pub fn new(compliance: Compliance) -> Self {
        Self {
            compliance,
            versions: OnceBox::new(),
        }
    }

    pub fn compliance(&self) -> &Compliance {
        &self.compliance
    }

    /// Cached versions, if a previous call already computed them.
    pub fn cached(&self) -> Option<&[u16]> {
        self.versions.get().map(Vec::as_slice)
    }

    /// Versions for the archive behind `handle`. A listing failure yields no
    /// versions and leaves the cell empty so a later call retries.
    pub fn versions(&self, handle: &mut ArchiveHandle) -> &[u16] {
        if let Some(versions) = self.cached() {
            return versions;
        }
        match self.scan(handle) {
            Some(versions) => self.versions.get_or_init(|| Box::new(versions)).as_slice(),
            None => &[],
        }
    }

    fn scan(&self, handle: &mut ArchiveHandle) -> Option<Vec<u16>> {
        let ceiling = match self.compliance.release() {
            Some(release) if release >= MULTI_RELEASE_FLOOR => release,
            _ => return Some(Vec::new()),
        };

        let names = match handle.entry_names() {
            Ok(names) => names,
            Err(error) => {
                warn!(
                    target: "jv::classpath",
                    location = handle.location(),
                    %error,
                    "failed to list multi-release versions"
                );
                return None;
            }
        };

        let present: BTreeSet<u16> = names
            .iter()
            .filter_map(|name| version_of(name))
            .collect();
        let versions: Vec<u16> = present
            .range(MULTI_RELEASE_FLOOR..=ceiling)
            .rev()
            .copied()
            .collect();

        debug!(
            target: "jv::classpath",
            location = handle.location(),
            compliance = %self.compliance,
            ?versions,
            "computed multi-release versions"
        );
        Some(versions)
    }
}

/// Version directory an entry sits in (or names), e.g. `11` for
/// `META-INF/versions/11/pkg/Foo.class`. Only canonical decimal names count,
/// since overlay paths are rebuilt from the number.
fn version_of(entry: &str) -> Option<u16> {
    let rest = entry.strip_prefix(VERSIONS_ROOT)?;
    let segment = rest.split('/').next()?;
    if segment.is_empty()
        || segment.starts_with('0')
        || !segment.bytes().all(|byte| byte.is_ascii_digit())
    {
        return None;
    }
    segment.parse().ok()
}

impl fmt::Debug for VersionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionCatalog")
            .field("compliance", &self.compliance)
            .field("versions", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveSource, MemoryArchive};
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    fn archive_with_versions(versions: &[u16]) -> MemoryArchive {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default();
        for version in versions {
            writer
                .start_file(overlay_path(*version, "pkg/Foo.class"), options)
                .expect("start entry");
            writer.write_all(b"body").expect("write entry");
        }
        writer
            .start_file("META-INF/versions/README", options)
            .expect("start entry");
        let bytes = writer.finish().expect("finish archive").into_inner();
        MemoryArchive::new("catalog.jar", bytes)
    }

    fn versions_for(compliance: &str, present: &[u16]) -> Vec<u16> {
        let archive = archive_with_versions(present);
        let catalog = VersionCatalog::new(Compliance::new(compliance));
        let mut handle = archive.open().expect("open archive");
        catalog.versions(&mut handle).to_vec()
    }

    #[test]
    fn newest_first_up_to_compliance() {
        assert_eq!(versions_for("17", &[9, 11, 17]), vec![17, 11, 9]);
        assert_eq!(versions_for("11", &[9, 11, 17]), vec![11, 9]);
        assert_eq!(versions_for("21", &[11, 17]), vec![17, 11]);
    }

    #[test]
    fn versions_below_floor_are_ignored() {
        assert_eq!(versions_for("17", &[8, 9]), vec![9]);
        assert!(versions_for("1.8", &[9, 11]).is_empty());
        assert!(versions_for("latest", &[9, 11]).is_empty());
    }

    #[test]
    fn result_is_cached() {
        let catalog = VersionCatalog::new(Compliance::new("17"));
        assert!(catalog.cached().is_none());

        let mut first = archive_with_versions(&[11]).open().expect("open archive");
        assert_eq!(catalog.versions(&mut first), &[11]);

        let mut second = archive_with_versions(&[17]).open().expect("open archive");
        assert_eq!(catalog.versions(&mut second), &[11]);
        assert_eq!(catalog.cached(), Some(&[11][..]));
    }

    #[test]
    fn large_compliance_only_keeps_present_versions() {
        assert_eq!(versions_for("60000", &[11, 17]), vec![17, 11]);
    }

    #[test]
    fn version_directory_names_must_be_canonical() {
        assert_eq!(version_of("META-INF/versions/11/pkg/Foo.class"), Some(11));
        assert_eq!(version_of("META-INF/versions/11"), Some(11));
        assert_eq!(version_of("META-INF/versions/011/pkg/Foo.class"), None);
        assert_eq!(version_of("META-INF/versions/+11/pkg/Foo.class"), None);
        assert_eq!(version_of("META-INF/versions/README"), None);
        assert_eq!(version_of("META-INF/versions/99999/Foo.class"), None);
        assert_eq!(version_of("pkg/Foo.class"), None);
    }

    #[test]
    fn overlay_paths_are_built_under_versions_root() {
        assert_eq!(overlay_path(17, "pkg/Foo.class"), "META-INF/versions/17/pkg/Foo.class");
    }
}
