//! Human-readable, append-only location log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sample::Location;

/// Append-only text log with one block per accepted location.
#[derive(Debug, Clone)]
pub struct TextLog {
    path: PathBuf,
}

impl TextLog {
    /// Create a handle; the file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the block written for record `id`.
    #[must_use]
    pub fn render_block(id: u64, fix: &Location) -> String {
        format!(
            "Record #{id}:\n  Latitude: {}\n  Longitude: {}\n  Altitude: {}\n  Time: {}\n---\n",
            fix.latitude, fix.longitude, fix.altitude, fix.timestamp_ms
        )
    }

    /// Append the block for record `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistWrite`] if the file cannot be opened or written.
    pub fn append(&self, id: u64, fix: &Location) -> Result<()> {
        let block = Self::render_block(id, fix);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(block.as_bytes()))
            .map_err(|source| Error::PersistWrite {
                path: self.path.clone(),
                source,
            })
    }

    /// Truncate the log to empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistWrite`] if the file cannot be truncated.
    pub fn clear(&self) -> Result<()> {
        File::create(&self.path)
            .map(drop)
            .map_err(|source| Error::PersistWrite {
                path: self.path.clone(),
                source,
            })
    }
}
