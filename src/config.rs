use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATABASE_DIR: &str = "database";
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_SESSION_HOURS: u64 = 24;

/// Server settings, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `DATAVISOR_BIND`
    pub bind_addr: String,
    /// `DATAVISOR_DATABASE_DIR`
    pub database_dir: PathBuf,
    /// `GOOGLE_DRIVE_API_BASE`
    pub drive_api_base: String,
    /// `DATAVISOR_SESSION_HOURS`
    pub session_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_dir: PathBuf::from(DEFAULT_DATABASE_DIR),
            drive_api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_HOURS * 60 * 60),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any variable source; unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = AppConfig::default();

        if let Some(bind) = lookup("DATAVISOR_BIND") {
            config.bind_addr = bind;
        }
        if let Some(dir) = lookup("DATAVISOR_DATABASE_DIR") {
            config.database_dir = PathBuf::from(dir);
        }
        if let Some(base) = lookup("GOOGLE_DRIVE_API_BASE") {
            config.drive_api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(hours) = lookup("DATAVISOR_SESSION_HOURS").and_then(|h| h.parse::<u64>().ok()) {
            config.session_ttl = Duration::from_secs(hours * 60 * 60);
        }

        config
    }

    pub fn files_table(&self) -> PathBuf {
        self.database_dir.join("files.json")
    }
}
