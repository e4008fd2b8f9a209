//! Scoped, read-only access to archive files.
//!
//! Callers never hold a ZIP reader directly: [`ArchiveSource::open`] hands out
//! an [`ArchiveHandle`] that releases the underlying reader when it goes out
//! of scope, whichever path the caller leaves by.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error while opening {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("ZIP error while reading {location}: {source}")]
    Zip {
        location: String,
        #[source]
        source: ZipError,
    },
    #[error("failed to read entry {entry} in {location}: {source}")]
    EntryRead {
        location: String,
        entry: String,
        #[source]
        source: io::Error,
    },
}

/// Entry-level operations on an opened archive.
///
/// Readers may be thread-affine; each thread opens its own handle.
pub trait ArchiveReader {
    /// Entry names in central-directory order.
    fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError>;

    /// Reads the named entry, `Ok(None)` when it does not exist.
    fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError>;
}

/// Something that can be opened as an archive, such as a JAR on disk.
pub trait ArchiveSource: fmt::Debug + Send + Sync {
    fn open(&self) -> Result<ArchiveHandle, ArchiveError>;

    /// Human readable location used in logs and errors.
    fn location(&self) -> String;
}

/// An open archive. Dropping the handle releases the reader.
pub struct ArchiveHandle {
    location: String,
    reader: Box<dyn ArchiveReader>,
}

impl ArchiveHandle {
    pub fn new(location: impl Into<String>, reader: Box<dyn ArchiveReader>) -> Self {
        let location = location.into();
        debug!(target: "jv::classpath", location = %location, "opened archive handle");
        Self { location, reader }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        self.reader.entry_names()
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.reader.read_entry(name)
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        debug!(target: "jv::classpath", location = %self.location, "released archive handle");
    }
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// [`ArchiveReader`] backed by the `zip` crate.
pub struct ZipReader<R: Read + Seek> {
    location: String,
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> ZipReader<R> {
    pub fn new(location: impl Into<String>, reader: R) -> Result<Self, ArchiveError> {
        let location = location.into();
        let archive = ZipArchive::new(reader).map_err(|source| ArchiveError::Zip {
            location: location.clone(),
            source,
        })?;
        Ok(Self { location, archive })
    }
}

impl<R: Read + Seek> ArchiveReader for ZipReader<R> {
    fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        let mut names = Vec::with_capacity(self.archive.len());
        for idx in 0..self.archive.len() {
            let entry = self
                .archive
                .by_index_raw(idx)
                .map_err(|source| ArchiveError::Zip {
                    location: self.location.clone(),
                    source,
                })?;
            names.push(entry.name().to_string());
        }
        Ok(names)
    }

    fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(source) => {
                return Err(ArchiveError::Zip {
                    location: self.location.clone(),
                    source,
                })
            }
        };

        // the declared size comes from the archive and is not trusted
        let mut buffer = Vec::new();
        entry
            .read_to_end(&mut buffer)
            .map_err(|source| ArchiveError::EntryRead {
                location: self.location.clone(),
                entry: name.to_string(),
                source,
            })?;
        Ok(Some(buffer))
    }
}

/// Archive stored on the local file system.
#[derive(Debug, Clone)]
pub struct FileArchive {
    path: PathBuf,
}

impl FileArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSource for FileArchive {
    fn open(&self) -> Result<ArchiveHandle, ArchiveError> {
        let location = self.location();
        let file = File::open(&self.path).map_err(|source| ArchiveError::Io {
            location: location.clone(),
            source,
        })?;
        let reader = ZipReader::new(location.clone(), BufReader::new(file))?;
        Ok(ArchiveHandle::new(location, Box::new(reader)))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Archive held in memory, e.g. an embedded JAR.
#[derive(Clone)]
pub struct MemoryArchive {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemoryArchive {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for MemoryArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArchive")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ArchiveSource for MemoryArchive {
    fn open(&self) -> Result<ArchiveHandle, ArchiveError> {
        let reader = ZipReader::new(self.name.clone(), Cursor::new(Arc::clone(&self.bytes)))?;
        Ok(ArchiveHandle::new(self.name.clone(), Box::new(reader)))
    }

    fn location(&self) -> String {
        self.name.clone()
    }
}

/// Display form for an entry inside an archive, `archive.jar!/pkg/Foo.class`.
pub fn entry_display(location: &str, entry: &str) -> String {
    let mut display = String::with_capacity(location.len() + entry.len() + 2);
    display.push_str(location);
    display.push('!');
    display.push('/');
    display.push_str(entry);
    display
}
