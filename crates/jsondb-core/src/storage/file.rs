use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::types::StoreDocument;

/// Indentation used when serializing the store document.
pub const JSON_INDENT: &[u8] = b"    ";

/// How a write replaces the file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Truncate the file and write in place (default). A crash mid-write
    /// can leave a truncated, unparsable file behind.
    #[default]
    Overwrite,
    /// Write into a temporary file in the same directory, then rename it
    /// over the target. Readers see either the old or the new document.
    Atomic,
}

/// Whether a write is followed by an fsync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after every write. Maximum durability.
    Full,
    /// Leave flushing to the OS (default).
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    pub write_mode: WriteMode,
    pub sync: SyncMode,
}

/// File manager for the single JSON resource backing a database.
///
/// The store is the only component performing I/O. Every read returns the
/// whole document and every write replaces it; the store never interprets
/// table content. No locking is performed: the file is assumed to have a
/// single writer at a time.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    options: StoreOptions,
}

impl JsonStore {
    /// Open the store at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open the store at `path`, creating parent directories and an empty
    /// file when they do not exist yet.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.is_file() {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            debug!(path = %path.display(), "created empty store file");
        }

        Ok(Self { path, options })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Read the whole store document.
    ///
    /// Empty or malformed content yields an empty document; only I/O
    /// failures are surfaced.
    pub fn read(&self) -> Result<StoreDocument, StorageError> {
        match self.read_strict() {
            Ok(doc) => Ok(doc),
            Err(StorageError::Malformed(e)) => {
                warn!(path = %self.path.display(), error = %e, "malformed store content, treating as empty");
                Ok(Map::new())
            }
            Err(StorageError::NotAnObject) => {
                warn!(path = %self.path.display(), "store content is not an object, treating as empty");
                Ok(Map::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Read the whole store document, surfacing malformed content.
    ///
    /// An empty (or whitespace-only) file is a freshly created store, not an
    /// error.
    pub fn read_strict(&self) -> Result<StoreDocument, StorageError> {
        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Value>(&bytes).map_err(StorageError::Malformed)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(StorageError::NotAnObject),
        }
    }

    /// Replace the whole store document.
    pub fn write(&self, doc: &StoreDocument) -> Result<(), StorageError> {
        let bytes = serialize(doc)?;

        match self.options.write_mode {
            WriteMode::Overwrite => {
                let mut file = File::create(&self.path)?;
                file.write_all(&bytes)?;
                if self.options.sync == SyncMode::Full {
                    file.sync_all()?;
                }
            }
            WriteMode::Atomic => {
                let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir())?;
                tmp.write_all(&bytes)?;
                if self.options.sync == SyncMode::Full {
                    tmp.as_file().sync_all()?;
                }
                tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
            }
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), tables = doc.len(), "store written");
        Ok(())
    }

    /// Delete the backing file.
    pub fn destroy(&self) -> Result<(), StorageError> {
        fs::remove_file(&self.path)?;
        debug!(path = %self.path.display(), "store file removed");
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

fn serialize(doc: &StoreDocument) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(JSON_INDENT));
    doc.serialize(&mut ser).map_err(StorageError::Serialization)?;
    Ok(buf)
}
