//! Classpath entries for JAR archives, including multi-release JARs.
//!
//! A multi-release JAR carries its regular classes in the base tree and
//! alternative bodies under `META-INF/versions/<release>/`. Which of those
//! overlays is visible depends on the target compliance: a lookup walks the
//! eligible overlays from the newest release down to 9 and falls back to the
//! base tree when none of them supplies the class.
//!
//! Archive trouble never escapes as an error. Unreadable archives and
//! malformed class files are logged through `tracing`, counted in
//! [`DiagnosticsSnapshot`], and look like missing entries to the caller.

pub mod archive;
pub mod catalog;
pub mod classfile;
pub mod compliance;
mod config;
pub mod index;
mod jar;
mod location;
pub mod manifest;
mod multi_release;

pub use archive::{ArchiveError, ArchiveHandle, ArchiveReader, ArchiveSource, FileArchive, MemoryArchive};
pub use catalog::VersionCatalog;
pub use classfile::{BinaryType, ClassParseError, MemberInfo, ModuleDescriptor};
pub use compliance::Compliance;
pub use config::{ClasspathConfig, ConfigError};
pub use index::{IndexLayout, IndexStatus, PackageIndex, PackageIndexer};
pub use jar::{
    ClassAnswer, ClassLookup, ClasspathJar, DiagnosticsSnapshot, EntryError, EntryOrigin,
    JarContents,
};
pub use location::{for_library, ClasspathLocation};
pub use multi_release::MultiReleaseJar;
