//! JSON collection files.
//!
//! A collection is a file holding every record of one kind ever accepted.
//! Readers always see it as an array of records, whatever the on-disk
//! format.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StorageFormat;
use crate::error::{Error, Result};

/// A persisted collection of JSON records.
pub trait Collection: std::fmt::Debug + Send + Sync {
    /// Path of the backing file.
    fn path(&self) -> &Path;

    /// Durably add one record at the end of the collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistWrite`] if the file cannot be written.
    fn append(&self, record: &Value) -> Result<()>;

    /// Materialize the collection as an array.
    ///
    /// Missing, empty or unparsable content reads as empty; this never
    /// fails.
    fn load(&self) -> Vec<Value>;

    /// Truncate the collection to empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistWrite`] if the file cannot be truncated.
    fn clear(&self) -> Result<()> {
        File::create(self.path())
            .map(drop)
            .map_err(|source| write_error(self.path(), source))
    }
}

/// Open the collection at `path` in the given format.
#[must_use]
pub fn open(path: impl Into<PathBuf>, format: StorageFormat) -> Box<dyn Collection> {
    let path = path.into();
    match format {
        StorageFormat::Array => Box::new(ArrayFile::new(path)),
        StorageFormat::JsonLines => Box::new(LineLog::new(path)),
    }
}

fn write_error(path: &Path, source: io::Error) -> Error {
    Error::PersistWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// A file holding one pretty-printed JSON array.
///
/// Appending reads the whole array, pushes the record and rewrites the
/// file. The rewrite goes through a sibling temporary file and a rename, so
/// a crash leaves either the old or the new array on disk. Unparsable
/// content is still discarded on the next append.
#[derive(Debug, Clone)]
pub struct ArrayFile {
    path: PathBuf,
}

impl ArrayFile {
    /// Create a handle; the file is not touched until used.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "collection".into(), |n| n.to_string_lossy().into_owned());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn write_all(&self, records: &[Value]) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        records.serialize(&mut ser)?;

        let tmp = self.temp_path();
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&buf)?;
            file.sync_all()
        });
        written
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| write_error(&self.path, source))
    }
}

impl Collection for ArrayFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &Value) -> Result<()> {
        let mut records = self.load();
        records.push(record.clone());
        self.write_all(&records)?;
        debug!(path = %self.path.display(), len = records.len(), "Rewrote collection");
        Ok(())
    }

    fn load(&self) -> Vec<Value> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Collection unreadable, treating as empty");
                return Vec::new();
            }
        };
        if text.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(records)) => records,
            Ok(_) => {
                warn!(path = %self.path.display(), "Collection is not an array, treating as empty");
                Vec::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Collection unparsable, treating as empty");
                Vec::new()
            }
        }
    }
}

/// A file holding one compact JSON record per line.
///
/// Appends never rewrite existing bytes. A torn last line is skipped when
/// reading.
#[derive(Debug, Clone)]
pub struct LineLog {
    path: PathBuf,
}

impl LineLog {
    /// Create a handle; the file is not touched until used.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Collection for LineLog {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &Value) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(line.as_bytes())?;
                file.sync_data()
            })
            .map_err(|source| write_error(&self.path, source))
    }

    fn load(&self) -> Vec<Value> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Collection unreadable, treating as empty");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = index + 1, error = %e, "Skipping unparsable record");
                }
            }
        }
        records
    }
}
