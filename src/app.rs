#![cfg(feature = "web")]

use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::catalog::{FileCatalog, FileRecord};
use crate::config::AppConfig;
use crate::drive::{self, DownloadRequest, DownloadResponse, DriveApi, FileList, GoogleDriveClient};
use crate::error::{Error, Result};
use crate::item::{ItemId, Items};
use crate::login::{
    Credentials, IdentityProvider, Registration, Session, UserDirectory, UserProfile,
};
use crate::storage::KeyValueStore;
use crate::store::{Crumb, ItemStore};
use crate::upload::{UploadedFile, is_accepted};

pub const SESSION_COOKIE: &str = "session";

/// Largest request body `/api/upload` accepts
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Everything the handlers share
///
/// Owns one item store per user; stores are opened on first use and live
/// until the server stops.
pub struct AppState {
    pub config: AppConfig,
    pub users: UserDirectory,
    pub catalog: FileCatalog,
    pub drive: Arc<dyn DriveApi>,
    stores: Mutex<HashMap<String, Arc<Mutex<ItemStore>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, drive: Arc<dyn DriveApi>) -> Result<Self> {
        let users = UserDirectory::open(&config.database_dir, config.session_ttl)?;
        let catalog = FileCatalog::new(config.files_table());

        Ok(AppState {
            config,
            users,
            catalog,
            drive,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// The user's store, opened on first use
    ///
    /// The map lock is not held while the store loads. When two requests
    /// race, the first store inserted wins and the other is dropped.
    fn store_for(&self, user_id: &str) -> Result<Arc<Mutex<ItemStore>>> {
        {
            let stores = self.stores.lock().map_err(|_| Error::Poisoned)?;
            if let Some(store) = stores.get(user_id) {
                return Ok(store.clone());
            }
        }

        let storage: Arc<dyn KeyValueStore> = Arc::new(self.users.storage_for(user_id));
        let opened = Arc::new(Mutex::new(ItemStore::open(storage)?));

        let mut stores = self.stores.lock().map_err(|_| Error::Poisoned)?;
        let store = stores
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!("Opened item store for user {}", user_id);
                opened
            })
            .clone();
        Ok(store)
    }

    /// Run `f` against the user's store while holding its lock
    fn with_store<T>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut ItemStore) -> Result<T>,
    ) -> Result<T> {
        let store = self.store_for(user_id)?;
        let mut store = store.lock().map_err(|_| Error::Poisoned)?;
        f(&mut store)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotAuthenticated | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::MissingCredentials
            | Error::NoProviderToken
            | Error::MissingFileId
            | Error::Upstream(_)
            | Error::NotAFolder(_)
            | Error::BreadcrumbOutOfRange(_)
            | Error::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            Error::NotVisible(_) | Error::FolderNotFound(_) => StatusCode::NOT_FOUND,
            Error::EmailTaken(_) => StatusCode::CONFLICT,
            Error::Io(_) | Error::Json(_) | Error::Poisoned | Error::PasswordHash(_) => {
                error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Current folder, its contents and the way back to the root
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    pub current_folder_id: Option<ItemId>,
    pub breadcrumbs: Vec<Crumb>,
    pub items: Items,
}

impl FolderView {
    fn of(store: &ItemStore) -> Self {
        FolderView {
            current_folder_id: store.current_folder_id().cloned(),
            breadcrumbs: store.breadcrumbs(),
            items: store.list_visible().to_vec(),
        }
    }
}

#[derive(Deserialize)]
struct NewFolder {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkRequest {
    provider_token: String,
}

#[derive(Serialize)]
struct UploadResult {
    inserted: Vec<ItemId>,
    skipped: Vec<String>,
    view: FolderView,
}

#[derive(Serialize)]
struct ImportResult {
    file: DownloadResponse,
    record: FileRecord,
    view: FolderView,
}

/// Token from `Authorization: Bearer ..`, falling back to the session cookie
fn session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    bearer.or_else(|| jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string()))
}

fn authenticate(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> Result<Session> {
    session_token(jar, headers)
        .and_then(|token| state.users.session(&token))
        .ok_or(Error::NotAuthenticated)
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .build()
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(registration): Form<Registration>,
) -> Result<(CookieJar, Json<UserProfile>)> {
    state.users.register(&registration)?;
    let (token, user) = state.users.login(&Credentials {
        email: registration.email,
        password: registration.password,
    })?;

    Ok((jar.add(session_cookie(token)), Json(UserProfile::from(&user))))
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Result<(CookieJar, Json<UserProfile>)> {
    let (token, user) = state.users.login(&credentials)?;
    Ok((jar.add(session_cookie(token)), Json(UserProfile::from(&user))))
}

async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, StatusCode)> {
    if let Some(token) = session_token(&jar, &headers) {
        state.users.logout(&token)?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

async fn handle_me(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<UserProfile>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .users
        .profile(&session.user_id)?
        .map(Json)
        .ok_or(Error::NotAuthenticated)
}

async fn handle_link_google(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<LinkRequest>,
) -> Result<StatusCode> {
    let session = authenticate(&state, &jar, &headers)?;
    if request.provider_token.trim().is_empty() {
        return Err(Error::NoProviderToken);
    }
    state
        .users
        .link_provider(&session.user_id, request.provider_token.trim())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_list_items(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| Ok(FolderView::of(store)))
        .map(Json)
}

async fn handle_open(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(folder_id): Path<String>,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| {
            store.navigate_into(&ItemId::from(folder_id))?;
            Ok(FolderView::of(store))
        })
        .map(Json)
}

async fn handle_up(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| {
            store.navigate_up();
            Ok(FolderView::of(store))
        })
        .map(Json)
}

async fn handle_root(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| {
            store.navigate_to_root();
            Ok(FolderView::of(store))
        })
        .map(Json)
}

async fn handle_breadcrumb(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| {
            if index >= store.breadcrumb_ids().len() {
                return Err(Error::BreadcrumbOutOfRange(index));
            }
            store.navigate_to_breadcrumb(index);
            Ok(FolderView::of(store))
        })
        .map(Json)
}

async fn handle_create_folder(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<NewFolder>,
) -> Result<(StatusCode, Json<FolderView>)> {
    let session = authenticate(&state, &jar, &headers)?;
    state.with_store(&session.user_id, |store| {
        let status = match store.create_folder(&request.name)? {
            Some(_) => StatusCode::CREATED,
            None => StatusCode::OK,
        };
        Ok((status, Json(FolderView::of(store))))
    })
}

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResult>)> {
    let session = authenticate(&state, &jar, &headers)?;

    let mut files = Vec::new();
    let mut skipped = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidUpload(e.to_string()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_accepted(&name) {
            debug!("Skipping upload of unsupported file {}", name);
            skipped.push(name);
            continue;
        }

        let mut size_bytes = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::InvalidUpload(e.to_string()))?
        {
            size_bytes += chunk.len() as u64;
        }
        files.push(UploadedFile::new(
            name,
            size_bytes,
            Utc::now().timestamp_millis(),
        ));
    }

    let (inserted, view) = state.with_store(&session.user_id, |store| {
        let inserted = store.insert_files(&files)?;
        Ok((inserted, FolderView::of(store)))
    })?;

    let status = if inserted.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(UploadResult {
            inserted,
            skipped,
            view,
        }),
    ))
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Result<Json<FolderView>> {
    let session = authenticate(&state, &jar, &headers)?;
    state
        .with_store(&session.user_id, |store| {
            store.delete_item(&ItemId::from(item_id))?;
            Ok(FolderView::of(store))
        })
        .map(Json)
}

async fn handle_drive_files(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<FileList>> {
    let token = session_token(&jar, &headers);
    drive::list_files(&state.users, state.drive.as_ref(), token.as_deref())
        .await
        .map(Json)
}

async fn handle_drive_download(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>> {
    let token = session_token(&jar, &headers);
    let (_, response) =
        drive::download_file(&state.users, state.drive.as_ref(), token.as_deref(), &request)
            .await?;
    Ok(Json(response))
}

/// Download a drive file, add it to the open folder and record it in the
/// catalog
///
/// The catalog row is written only once the tree holds the file.
async fn handle_drive_import(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<DownloadRequest>,
) -> Result<(StatusCode, Json<ImportResult>)> {
    let token = session_token(&jar, &headers);
    let (session, file) =
        drive::download_file(&state.users, state.drive.as_ref(), token.as_deref(), &request)
            .await?;

    let upload = UploadedFile::new(
        file.name.clone(),
        file.size as u64,
        Utc::now().timestamp_millis(),
    );
    let view = state.with_store(&session.user_id, |store| {
        store.insert_files(std::slice::from_ref(&upload))?;
        Ok(FolderView::of(store))
    })?;

    let record = state.catalog.record(
        &session.user_id,
        &file.name,
        file.size as u64,
        &file.mime_type,
        Some(file.path.clone()),
    )?;

    info!("Imported drive file {} for user {}", file.name, session.user_id);
    Ok((StatusCode::CREATED, Json(ImportResult { file, record, view })))
}

async fn handle_list_files(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<Vec<FileRecord>>> {
    let session = authenticate(&state, &jar, &headers)?;
    state.catalog.for_user(&session.user_id).map(Json)
}

/// All routes over the given state
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ]);

    let functions = Router::new()
        .route("/google-drive-files", post(handle_drive_files))
        .route("/google-drive-download", post(handle_drive_download))
        .layer(cors);

    Router::new()
        .route("/api/register", post(handle_register))
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/me", get(handle_me))
        .route("/api/link/google", post(handle_link_google))
        .route("/api/items", get(handle_list_items))
        .route("/api/items/:id", delete(handle_delete))
        .route("/api/nav/open/:id", post(handle_open))
        .route("/api/nav/up", post(handle_up))
        .route("/api/nav/root", post(handle_root))
        .route("/api/nav/breadcrumb/:index", post(handle_breadcrumb))
        .route("/api/folders", post(handle_create_folder))
        .route(
            "/api/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/drive/import", post(handle_drive_import))
        .route("/api/files", get(handle_list_files))
        .nest("/functions", functions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the application until the process is stopped
pub async fn run(config: AppConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let drive = Arc::new(GoogleDriveClient::new(config.drive_api_base.clone()));
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, drive)?);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
