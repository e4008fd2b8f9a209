use crate::archive::ArchiveSource;
use crate::catalog::VERSIONS_ROOT;
use crate::classfile::MODULE_INFO_CLASS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const META_INF: &str = "META-INF/";

/// Whether an index reflects the archive or stands in for an unreadable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    Indexed,
    Unreadable,
}

/// Logical packages of a classpath archive plus the first module descriptor
/// path seen while enumerating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    packages: BTreeSet<String>,
    module_info_candidate: Option<String>,
    status: IndexStatus,
}

impl PackageIndex {
    /// Index containing only the default package.
    pub fn empty(status: IndexStatus) -> Self {
        let mut packages = BTreeSet::new();
        packages.insert(String::new());
        Self {
            packages,
            module_info_candidate: None,
            status,
        }
    }

    pub fn contains(&self, qualified_package_name: &str) -> bool {
        self.packages.contains(qualified_package_name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Best-effort hint; the module loader does its own search.
    pub fn module_info_candidate(&self) -> Option<&str> {
        self.module_info_candidate.as_deref()
    }

    pub fn status(&self) -> IndexStatus {
        self.status
    }

    /// Registers the package of `file_name` and all of its ancestors.
    /// Directory entries (`a/b/`) register themselves.
    fn add_entry(&mut self, file_name: &str) {
        let mut last = file_name.rfind('/');
        while let Some(end) = last.filter(|end| *end > 0) {
            let package = &file_name[..end];
            if !self.packages.insert(package.to_string()) {
                // ancestors were registered with it
                return;
            }
            last = package.rfind('/');
        }
    }

    fn note_module_info(&mut self, file_name: &str) {
        if self.module_info_candidate.is_some() {
            return;
        }
        let member = file_name
            .rsplit_once('/')
            .map(|(_, member)| member)
            .unwrap_or(file_name);
        if member.eq_ignore_ascii_case(MODULE_INFO_CLASS) {
            self.module_info_candidate = Some(file_name.to_string());
        }
    }
}

/// How entry names map onto logical paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    /// Every entry is taken as is, `META-INF` included.
    Flat,
    /// Overlay entries are folded onto their logical path and other
    /// `META-INF` content is skipped.
    MultiRelease,
}

impl IndexLayout {
    /// Logical path for an entry name, `None` when the entry is not part of
    /// the logical tree.
    pub fn logical_path<'a>(self, name: &'a str) -> Option<&'a str> {
        match self {
            IndexLayout::Flat => Some(name),
            IndexLayout::MultiRelease => multi_release_logical_path(name),
        }
    }
}

fn multi_release_logical_path(name: &str) -> Option<&str> {
    if let Some(rest) = name.strip_prefix(VERSIONS_ROOT) {
        let (_version, logical) = rest.split_once('/')?;
        return (!logical.is_empty()).then_some(logical);
    }
    if name.starts_with(META_INF) {
        return None;
    }
    Some(name)
}

/// Enumerates an archive once and derives its [`PackageIndex`].
#[derive(Debug, Clone, Copy)]
pub struct PackageIndexer {
    layout: IndexLayout,
}

impl PackageIndexer {
    pub fn new(layout: IndexLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> IndexLayout {
        self.layout
    }

    /// Indexes the archive. Failures to open or enumerate it yield an
    /// [`IndexStatus::Unreadable`] index holding only the default package.
    pub fn index(&self, source: &dyn ArchiveSource) -> PackageIndex {
        let names = source
            .open()
            .and_then(|mut handle| handle.entry_names());
        match names {
            Ok(names) => {
                let index = self.index_names(names.iter().map(String::as_str));
                debug!(
                    target: "jv::classpath",
                    location = %source.location(),
                    packages = index.len(),
                    module_info = ?index.module_info_candidate(),
                    "indexed archive packages"
                );
                index
            }
            Err(error) => {
                warn!(
                    target: "jv::classpath",
                    location = %source.location(),
                    %error,
                    "failed to enumerate archive, treating it as empty"
                );
                PackageIndex::empty(IndexStatus::Unreadable)
            }
        }
    }

    pub fn index_names<'a, I>(&self, names: I) -> PackageIndex
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = PackageIndex::empty(IndexStatus::Indexed);
        for name in names {
            let Some(file_name) = self.layout.logical_path(name) else {
                continue;
            };
            index.note_module_info(file_name);
            index.add_entry(file_name);
        }
        index
    }
}
