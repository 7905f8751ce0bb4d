use chrono::{DateTime, NaiveDate};
use log::warn;
use std::path::Path;

use crate::item::{FileEntry, ItemId};

/// Extensions the upload dialog accepts: CSV and Excel workbooks
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["csv", "xls", "xlsx"];

/// MIME types the drive listing is filtered to
pub const SPREADSHEET_MIME_TYPES: [&str; 2] = [
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
];

/// A file handed over by the browser's upload dialog or a drive import
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub name: String,
    pub size_bytes: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified_ms: i64,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, size_bytes: u64, last_modified_ms: i64) -> Self {
        UploadedFile {
            name: name.into(),
            size_bytes,
            last_modified_ms,
        }
    }

    /// Tree entry for this upload, with a fresh id
    pub fn to_entry(&self) -> FileEntry {
        FileEntry {
            id: ItemId::generate(),
            name: self.name.clone(),
            size: format_size(self.size_bytes),
            last_modified: format_date(self.last_modified_ms),
        }
    }
}

/// `"{megabytes:.2} MB"`
pub fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// UTC calendar date of an epoch-millisecond timestamp, `YYYY-MM-DD`
///
/// Timestamps chrono cannot represent fall back to the epoch.
pub fn format_date(epoch_ms: i64) -> String {
    let date = DateTime::from_timestamp_millis(epoch_ms).unwrap_or_else(|| {
        warn!("Timestamp {} ms is out of range, using the epoch", epoch_ms);
        DateTime::default()
    });
    date.format("%Y-%m-%d").to_string()
}

/// Name of the folder that wraps files uploaded at the root level
pub fn upload_folder_name(date: NaiveDate) -> String {
    format!("Uploads {}", date.format("%-m/%-d/%Y"))
}

/// Whether a file name carries one of the accepted spreadsheet extensions
pub fn is_accepted(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}
