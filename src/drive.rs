//! Drive proxy
//!
//! Two pass-through operations that forward the drive access token of an
//! authenticated session to the cloud drive API: list spreadsheet-like files
//! and fetch one file's content.
#![cfg(feature = "web")]

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::login::{IdentityProvider, Session};
use crate::upload::SPREADSHEET_MIME_TYPES;

/// A remote file as listed by the drive API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// File body decoded as text
    pub content: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Length of `content` in bytes
    pub size: usize,
    pub path: String,
}

/// The cloud drive API, seen from the proxy
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// CSV and spreadsheet files visible to the token's owner
    async fn list_spreadsheets(&self, provider_token: &str) -> Result<Vec<DriveFile>>;

    /// Raw content of one file, decoded as text
    async fn download(&self, provider_token: &str, file_id: &str) -> Result<String>;
}

/// Google Drive v3 over HTTPS
pub struct GoogleDriveClient {
    client: reqwest::Client,
    api_base: String,
}

impl GoogleDriveClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        GoogleDriveClient {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

/// `mimeType="a" or mimeType="b"`
fn spreadsheet_query() -> String {
    SPREADSHEET_MIME_TYPES
        .iter()
        .map(|mime| format!("mimeType=\"{}\"", mime))
        .collect::<Vec<_>>()
        .join(" or ")
}

#[async_trait]
impl DriveApi for GoogleDriveClient {
    async fn list_spreadsheets(&self, provider_token: &str) -> Result<Vec<DriveFile>> {
        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", provider_token))
            .query(&[
                ("fields", "files(id,name,mimeType)".to_string()),
                ("q", spreadsheet_query()),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Drive listing failed with {}: {}", status, body);
            return Ok(Vec::new());
        }

        let list: FileList = response
            .json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        debug!("Drive listing returned {} file(s)", list.files.len());
        Ok(list.files)
    }

    async fn download(&self, provider_token: &str, file_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!(
                "{}/files/{}",
                self.api_base,
                urlencoding::encode(file_id)
            ))
            .header(AUTHORIZATION, format!("Bearer {}", provider_token))
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Drive download of {} failed with {}", file_id, status);
            return Err(Error::Upstream(format!("Failed to download file: {}", body)));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))
    }
}

/// Storage key of a downloaded file: `google-drive/{user}/{millis}-{name}`
pub fn storage_path(user_id: &str, file_name: &str, epoch_ms: i64) -> String {
    format!("google-drive/{}/{}-{}", user_id, epoch_ms, file_name)
}

/// Session of a bearer token that carries a drive access token
pub fn authorize(
    identity: &dyn IdentityProvider,
    bearer: Option<&str>,
) -> Result<(Session, String)> {
    let session = bearer
        .and_then(|token| identity.session(token))
        .ok_or(Error::NotAuthenticated)?;
    let provider_token = session.provider_token.clone().ok_or(Error::NoProviderToken)?;
    Ok((session, provider_token))
}

/// List the caller's spreadsheet files
pub async fn list_files(
    identity: &dyn IdentityProvider,
    drive: &dyn DriveApi,
    bearer: Option<&str>,
) -> Result<FileList> {
    let (_, provider_token) = authorize(identity, bearer)?;
    let files = drive.list_spreadsheets(&provider_token).await?;
    Ok(FileList { files })
}

/// Fetch one file's content for the caller
pub async fn download_file(
    identity: &dyn IdentityProvider,
    drive: &dyn DriveApi,
    bearer: Option<&str>,
    request: &DownloadRequest,
) -> Result<(Session, DownloadResponse)> {
    let (session, provider_token) = authorize(identity, bearer)?;
    let file_id = request
        .file_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(Error::MissingFileId)?;

    let content = drive.download(&provider_token, file_id).await?;
    let path = storage_path(
        &session.user_id,
        &request.file_name,
        Utc::now().timestamp_millis(),
    );

    let response = DownloadResponse {
        size: content.len(),
        content,
        name: request.file_name.clone(),
        mime_type: request.mime_type.clone(),
        path,
    };
    Ok((session, response))
}
