use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Keys of the per-user key-value blob
pub mod keys {
    /// `"true"` while logged in, absent otherwise
    pub const IS_AUTHENTICATED: &str = "isAuthenticated";
    /// JSON `{id?, email, name}`
    pub const USER: &str = "user";
    /// JSON array of items, rewritten after every tree mutation
    pub const FOLDERS: &str = "folders";
    /// `"true"` once a drive account has been linked
    pub const GOOGLE_CONNECTED: &str = "googleConnected";
}

/// String key-value storage standing in for the browser's local storage.
///
/// Writes are synchronous: once `set` returns, the value survives a restart
/// for implementations that persist at all.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Storage that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| Error::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// One gzip-compressed JSON object per user on disk.
///
/// Every `set` and `remove` rewrites the whole file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub const FILE_NAME: &'static str = "storage.json.gz";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Storage file of one user inside the database directory
    pub fn for_user(database_dir: &Path, user_id: &str) -> Self {
        Self::new(database_dir.join(user_id).join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(GzDecoder::new(file));
        match serde_json::from_reader(reader) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    "Discarding unreadable storage file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(BTreeMap::new())
            }
        }
    }

    /// Write the map to a sibling temp file and rename it over the old one,
    /// so a failed write never leaves a torn file behind
    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        create_dir_all(dir)?;

        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(GzEncoder::new(temp, Compression::default()));
        serde_json::to_writer(&mut writer, entries)?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        let mut temp = encoder.finish()?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

impl KeyValueStore for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| Error::Poisoned)?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| Error::Poisoned)?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| Error::Poisoned)?;
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
