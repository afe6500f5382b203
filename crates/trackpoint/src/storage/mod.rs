//! Persistence layer for trackpoint.
//!
//! Accepted samples are appended to per-kind JSON collections, and location
//! samples additionally to a human-readable text log. Telephony data is
//! written by another process; this layer only reads and clears it.

pub mod collection;
pub mod text_log;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, StorageFormat};
use crate::error::{Error, Result};
use crate::sample::{Sample, TrafficRecord};

pub use collection::{ArrayFile, Collection, LineLog};
pub use text_log::TextLog;

/// Locations of every persisted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Location collection.
    pub locations: PathBuf,
    /// Location text log.
    pub location_log: PathBuf,
    /// Traffic collection.
    pub traffic: PathBuf,
    /// Telephony collection.
    pub telephony: PathBuf,
}

impl StoragePaths {
    /// Resolve paths from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            locations: config.location_path(),
            location_log: config.location_log_path(),
            traffic: config.traffic_path(),
            telephony: config.telephony_path(),
        }
    }

    /// Default file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.as_ref().to_path_buf());
        Self::from_config(&config)
    }
}

/// One entry of the telephony collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelephonyEntry {
    /// Epoch timestamp as written by the producer.
    #[serde(default)]
    pub timestamp: i64,
    /// Opaque telephony data.
    #[serde(default)]
    pub data: Value,
}

/// Outcome of persisting one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Files successfully appended to.
    pub written: usize,
    /// Files whose append failed (already logged).
    pub failed: usize,
}

impl PersistReport {
    fn record(&mut self, path: &Path, result: Result<()>) {
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Persistence write failed");
                self.failed += 1;
            }
        }
    }

    /// Whether every write succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Record counts across the persisted files.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    /// Records in the location collection.
    pub locations: usize,
    /// Records in the traffic collection.
    pub traffic: usize,
    /// Entries in the telephony collection.
    pub telephony: usize,
    /// Size of the text log in bytes.
    pub location_log_bytes: u64,
    /// The last persisted location payload.
    pub last_location: Option<Value>,
    /// The last persisted traffic record.
    pub last_traffic: Option<TrafficRecord>,
}

/// Durable append of accepted samples.
///
/// Appends and [`PersistenceWriter::clear_all`] take the same lock, so a
/// clear never interleaves with a half-written sample. Share one writer
/// (behind an `Arc`) between everything that mutates the files.
#[derive(Debug)]
pub struct PersistenceWriter {
    paths: StoragePaths,
    files_lock: Mutex<()>,
    locations: Box<dyn Collection>,
    traffic: Box<dyn Collection>,
    telephony: ArrayFile,
    text_log: TextLog,
}

impl PersistenceWriter {
    /// Open the writer, creating the data directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a parent directory cannot be created.
    pub fn open(paths: StoragePaths, format: StorageFormat) -> Result<Self> {
        for path in [
            &paths.locations,
            &paths.location_log,
            &paths.traffic,
            &paths.telephony,
        ] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
            }
        }

        debug!(?format, locations = %paths.locations.display(), "Opening collections");
        Ok(Self {
            locations: collection::open(&paths.locations, format),
            traffic: collection::open(&paths.traffic, format),
            telephony: ArrayFile::new(&paths.telephony),
            text_log: TextLog::new(&paths.location_log),
            files_lock: Mutex::new(()),
            paths,
        })
    }

    /// Open using the paths and format from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a parent directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(StoragePaths::from_config(config), config.storage.format)
    }

    /// Paths of the managed files.
    #[must_use]
    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    // The guarded data is `()`; a panic mid-write leaves nothing to repair.
    fn lock_files(&self) -> MutexGuard<'_, ()> {
        self.files_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist an accepted sample under its assigned id.
    ///
    /// Location samples go to the location collection and the text log;
    /// samples carrying traffic data also go to the traffic collection.
    /// Failures are logged and counted, never propagated.
    pub fn persist(&self, id: u64, sample: &Sample) -> PersistReport {
        let mut report = PersistReport::default();
        let _files = self.lock_files();

        if let Sample::Location(location) = sample {
            report.record(
                self.locations.path(),
                self.locations.append(&location.payload),
            );
            report.record(
                self.text_log.path(),
                self.text_log.append(id, &location.fix),
            );
        }

        if let Some(record) = sample.traffic() {
            let result = serde_json::to_value(record)
                .map_err(Error::from)
                .and_then(|value| self.traffic.append(&value));
            report.record(self.traffic.path(), result);
        }

        debug!(id, kind = %sample.kind(), written = report.written, failed = report.failed, "Persisted sample");
        report
    }

    /// Every location payload ever persisted.
    #[must_use]
    pub fn load_locations(&self) -> Vec<Value> {
        self.locations.load()
    }

    /// Every traffic record ever persisted; malformed entries are skipped.
    #[must_use]
    pub fn load_traffic(&self) -> Vec<TrafficRecord> {
        self.traffic
            .load()
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect()
    }

    /// Telephony entries written by the external producer; malformed
    /// entries are skipped.
    #[must_use]
    pub fn load_telephony(&self) -> Vec<TelephonyEntry> {
        self.telephony
            .load()
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect()
    }

    /// Truncate every managed file to empty.
    ///
    /// All files are attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn clear_all(&self) -> Result<()> {
        let _files = self.lock_files();
        let results = [
            self.locations.clear(),
            self.text_log.clear(),
            self.traffic.clear(),
            self.telephony.clear(),
        ];
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Failed to clear file");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => {
                info!("Cleared persisted files");
                Ok(())
            }
        }
    }

    /// Summarize the persisted files.
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        let locations = self.load_locations();
        let traffic = self.load_traffic();
        StorageStats {
            locations: locations.len(),
            traffic: traffic.len(),
            telephony: self.load_telephony().len(),
            location_log_bytes: std::fs::metadata(self.text_log.path()).map_or(0, |m| m.len()),
            last_location: locations.last().cloned(),
            last_traffic: traffic.last().cloned(),
        }
    }
}
