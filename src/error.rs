use std::fmt;

use crate::item::ItemId;

/// Errors produced by the item store, the identity layer and the drive proxy
#[derive(Debug)]
pub enum Error {
    /// Reading or writing persisted state failed
    Io(std::io::Error),

    /// A persisted blob or request body could not be (de)serialized
    Json(serde_json::Error),

    /// A lock guarding shared state was poisoned by a panicking writer
    Poisoned,

    /// The item is not part of the current view
    NotVisible(ItemId),

    /// The item exists but is a file, not a folder
    NotAFolder(ItemId),

    /// No folder with this id exists anywhere in the tree
    FolderNotFound(ItemId),

    /// Email and password are required
    MissingCredentials,

    /// Another account already uses this email
    EmailTaken(String),

    /// Unknown email or wrong password
    InvalidCredentials,

    /// Password hashing or hash parsing failed
    PasswordHash(String),

    /// No live session for the presented token
    NotAuthenticated,

    /// The session has no linked drive account
    NoProviderToken,

    /// A drive download request without a file id
    MissingFileId,

    /// The drive API failed or answered with a non-OK status
    Upstream(String),

    /// Breadcrumb position past the end of the trail
    BreadcrumbOutOfRange(usize),

    /// A multipart upload could not be read
    InvalidUpload(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage error: {}", e),
            Self::Json(e) => write!(f, "malformed data: {}", e),
            Self::Poisoned => write!(f, "a storage lock has been poisoned"),
            Self::NotVisible(id) => write!(f, "item {} is not in the current view", id),
            Self::NotAFolder(id) => write!(f, "item {} is not a folder", id),
            Self::FolderNotFound(id) => write!(f, "no folder with id {}", id),
            Self::MissingCredentials => write!(f, "Please enter both email and password"),
            Self::EmailTaken(email) => write!(f, "Email address {} is already registered", email),
            Self::InvalidCredentials => write!(f, "Invalid email or password"),
            Self::PasswordHash(e) => write!(f, "password hashing failed: {}", e),
            Self::NotAuthenticated => write!(f, "Not authenticated"),
            Self::NoProviderToken => write!(f, "No provider token found"),
            Self::MissingFileId => write!(f, "File ID is required"),
            Self::Upstream(message) => write!(f, "{}", message),
            Self::BreadcrumbOutOfRange(index) => write!(f, "no breadcrumb at position {}", index),
            Self::InvalidUpload(e) => write!(f, "upload could not be read: {}", e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
