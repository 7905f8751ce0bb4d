use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Metadata row of an imported file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type as reported by the source
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Storage key, e.g. `google-drive/{user}/{millis}-{name}`
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The `files` table, kept as a JSON array next to `users.json`
pub struct FileCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCatalog {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<FileRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a row and return it
    pub fn record(
        &self,
        user_id: &str,
        name: &str,
        size: u64,
        mime_type: &str,
        path: Option<String>,
    ) -> Result<FileRecord> {
        let _guard = self.lock.lock().map_err(|_| Error::Poisoned)?;

        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            size,
            mime_type: mime_type.to_string(),
            path,
            created_at: Utc::now(),
        };

        let mut records = self.load()?;
        records.push(record.clone());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&records)?)?;

        Ok(record)
    }

    /// Rows owned by one user, oldest first
    pub fn for_user(&self, user_id: &str) -> Result<Vec<FileRecord>> {
        let _guard = self.lock.lock().map_err(|_| Error::Poisoned)?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .collect())
    }
}
