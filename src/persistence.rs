//! Persistence backends
//!
//! The engine saves named JSON records (`entries`, `strategies`, ...) through
//! a `PersistenceBackend` and reloads them at construction.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CacheError, Result};

// == Record Names ==
pub const ENTRIES: &str = "entries";
pub const COUNTERS: &str = "counters";
pub const STRATEGIES: &str = "strategies";
pub const RULES: &str = "rules";
pub const PROFILES: &str = "profiles";
pub const SCHEDULES: &str = "schedules";
pub const TASKS: &str = "tasks";
pub const ALERTS: &str = "alerts";

// == Backend Trait ==
pub trait PersistenceBackend: Send + Sync {
    /// Returns None when the record has never been saved.
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Loads and decodes a record.
pub fn load_record<T: DeserializeOwned>(backend: &dyn PersistenceBackend, name: &str) -> Result<Option<T>> {
    match backend.load(name)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encodes a record for `PersistenceBackend::save`.
pub fn encode_record<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

// == Memory Backend ==
/// Keeps records in memory. State survives an engine rebuild only if the
/// same backend instance is handed to the new engine.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().get(name).cloned())
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.records.lock().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

// == File Backend ==
/// One `<name>.json` file per record in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Opens (and creates if needed) the data directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(CacheError::Persistence(format!("invalid record name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl PersistenceBackend for FileBackend {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes to a temp file and renames it over the record.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        let tmp = self.dir.join(format!("{}.json.tmp", name));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(record = name, bytes = bytes.len(), "Record saved");
        Ok(())
    }
}
