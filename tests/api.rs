#![cfg(feature = "web")]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use datavisor::app::{AppState, router};
use datavisor::config::AppConfig;
use datavisor::drive::{DriveApi, DriveFile};
use datavisor::error::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use tower::ServiceExt;

struct FakeDrive;

#[async_trait]
impl DriveApi for FakeDrive {
    async fn list_spreadsheets(&self, provider_token: &str) -> Result<Vec<DriveFile>> {
        assert_eq!(provider_token, "drive-token");
        Ok(vec![
            DriveFile {
                id: "sheet-1".into(),
                name: "budget.xlsx".into(),
                mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                    .into(),
            },
            DriveFile {
                id: "csv-1".into(),
                name: "leads.csv".into(),
                mime_type: "text/csv".into(),
            },
        ])
    }

    async fn download(&self, _provider_token: &str, file_id: &str) -> Result<String> {
        match file_id {
            "csv-1" => Ok("name,email\nann,ann@example.com\n".to_string()),
            other => Err(Error::Upstream(format!(
                "Failed to download file: {{\"error\":\"{} not found\"}}",
                other
            ))),
        }
    }
}

fn app() -> (TempDir, Router) {
    let dir = tempdir().unwrap();
    let config = AppConfig {
        database_dir: dir.path().to_path_buf(),
        ..AppConfig::default()
    };
    let state = AppState::new(config, Arc::new(FakeDrive)).unwrap();
    (dir, router(Arc::new(state)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Register a user and return their session token
async fn register(app: &Router, email: &str) -> String {
    let response = app
        .clone()
        .oneshot(form(
            "/api/register",
            &format!("email={}&password=secret&name=Tester", email),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    cookie
        .split(';')
        .next()
        .unwrap()
        .strip_prefix("session=")
        .unwrap()
        .to_string()
}

fn names(view: &Value) -> Vec<String> {
    view["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn requests_without_session_are_unauthorized() {
    let (_dir, app) = app();

    let (status, body) = send(&app, Request::get("/api/items").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");

    let (status, _) = send(&app, authed("GET", "/api/items", "made-up", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_wrong_password_fails() {
    let (_dir, app) = app();
    register(&app, "amy%40example.com").await;

    let wrong = form("/api/login", "email=amy%40example.com&password=nope");
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = form("/api/login", "email=amy%40example.com&password=secret");
    let (status, body) = send(&app, right).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Tester");
}

#[tokio::test]
async fn folder_workflow() {
    let (_dir, app) = app();
    let token = register(&app, "bob%40example.com").await;

    let (status, view) = send(&app, authed("GET", "/api/items", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&view), ["Sales Data", "Marketing"]);
    assert_eq!(view["currentFolderId"], Value::Null);

    let (status, view) = send(
        &app,
        authed("POST", "/api/folders", &token, Some(json!({ "name": "Reports" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(names(&view), ["Sales Data", "Marketing", "Reports"]);
    assert_eq!(view["items"][2]["items"], json!([]));

    let (status, view) = send(
        &app,
        authed("POST", "/api/folders", &token, Some(json!({ "name": "   " }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&view).len(), 3);

    let (status, view) = send(&app, authed("POST", "/api/nav/open/1", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["currentFolderId"], "1");
    assert_eq!(view["breadcrumbs"][0]["name"], "Sales Data");

    let (status, view) = send(&app, authed("DELETE", "/api/items/101", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&view), ["Q2_Sales.csv"]);

    let (status, _) = send(&app, authed("DELETE", "/api/items/201", &token, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, authed("POST", "/api/nav/open/102", &token, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, authed("POST", "/api/nav/breadcrumb/4", &token, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, view) = send(&app, authed("POST", "/api/nav/up", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&view), ["Sales Data", "Marketing", "Reports"]);
    assert_eq!(view["items"][0]["items"].as_array().unwrap().len(), 1);
}

const BOUNDARY: &str = "XBOUNDARYX";

fn file_part(boundary: &str, file_name: &str, mime: &str, content: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
         Content-Type: {}\r\n\r\n",
        boundary, file_name, mime
    )
    .into_bytes();
    part.extend_from_slice(content);
    part.extend_from_slice(b"\r\n");
    part
}

fn upload(token: &str, boundary: &str, mut body: Vec<u8>) -> Request<Body> {
    body.extend(format!("--{}--\r\n", boundary).into_bytes());
    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn multipart_upload_at_root_creates_uploads_folder() {
    let (_dir, app) = app();
    let token = register(&app, "cat%40example.com").await;

    let boundary = BOUNDARY;
    let mut body = Vec::new();
    body.extend(file_part(boundary, "q1.csv", "text/csv", b"a,b\n1,2\n"));
    body.extend(file_part(boundary, "notes.txt", "text/plain", b"hello"));
    let (status, result) = send(&app, upload(&token, boundary, body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["inserted"].as_array().unwrap().len(), 1);
    assert_eq!(result["skipped"], json!(["notes.txt"]));

    let items = result["view"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert!(items[2]["name"].as_str().unwrap().starts_with("Uploads "));
    let file = &items[2]["items"][0];
    assert_eq!(file["name"], "q1.csv");
    assert_eq!(file["type"], "file");
    assert_eq!(file["size"], "0.00 MB");
}

#[tokio::test]
async fn drive_proxy_status_mapping() {
    let (_dir, app) = app();

    let (status, body) = send(
        &app,
        Request::post("/functions/google-drive-files")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");

    let token = register(&app, "dan%40example.com").await;
    let list = || authed("POST", "/functions/google-drive-files", &token, None);
    let (status, body) = send(&app, list()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No provider token found");

    let (status, _) = send(
        &app,
        authed(
            "POST",
            "/api/link/google",
            &token,
            Some(json!({ "providerToken": "drive-token" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, list()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"][1]["name"], "leads.csv");
    assert_eq!(body["files"][1]["mimeType"], "text/csv");

    let (status, body) = send(
        &app,
        authed("POST", "/functions/google-drive-download", &token, Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "File ID is required");

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/functions/google-drive-download",
            &token,
            Some(json!({ "fileId": "gone", "fileName": "x.csv", "mimeType": "text/csv" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Failed to download file"));

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/functions/google-drive-download",
            &token,
            Some(json!({ "fileId": "csv-1", "fileName": "leads.csv", "mimeType": "text/csv" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "leads.csv");
    assert_eq!(body["type"], "text/csv");
    assert_eq!(body["size"], 31);
    assert!(body["path"].as_str().unwrap().starts_with("google-drive/"));
    assert!(body["path"].as_str().unwrap().ends_with("-leads.csv"));
}

#[tokio::test]
async fn drive_import_records_file_and_adds_it_to_open_folder() {
    let (_dir, app) = app();
    let token = register(&app, "eve%40example.com").await;
    send(
        &app,
        authed(
            "POST",
            "/api/link/google",
            &token,
            Some(json!({ "providerToken": "drive-token" })),
        ),
    )
    .await;
    send(&app, authed("POST", "/api/nav/open/2", &token, None)).await;

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/api/drive/import",
            &token,
            Some(json!({ "fileId": "csv-1", "fileName": "leads.csv", "mimeType": "text/csv" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["record"]["name"], "leads.csv");
    assert_eq!(names(&body["view"]), ["Campaign_Results.xlsx", "leads.csv"]);

    let (status, rows) = send(&app, authed("GET", "/api/files", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["size"], 31);
    assert_eq!(rows[0]["path"], body["file"]["path"]);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (_dir, app) = app();
    let token = register(&app, "fay%40example.com").await;

    let (status, profile) = send(&app, authed("GET", "/api/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "fay@example.com");

    let (status, _) = send(&app, authed("POST", "/api/logout", &token, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, authed("GET", "/api/items", &token, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_larger_than_two_megabytes_is_accepted() {
    let (_dir, app) = app();
    let token = register(&app, "gil%40example.com").await;
    send(&app, authed("POST", "/api/nav/open/1", &token, None)).await;

    let content = vec![b'7'; 3 * 1024 * 1024];
    let body = file_part(BOUNDARY, "big.csv", "text/csv", &content);
    let (status, result) = send(&app, upload(&token, BOUNDARY, body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        names(&result["view"]),
        ["Q1_Sales.csv", "Q2_Sales.csv", "big.csv"]
    );
    assert_eq!(result["view"]["items"][2]["size"], "3.00 MB");
}

#[tokio::test]
async fn drive_functions_answer_cors_preflight() {
    let (_dir, app) = app();

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/functions/google-drive-files")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "authorization,x-client-info,apikey,content-type",
        )
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("x-client-info"));
    assert!(allowed.contains("apikey"));

    let rejected = Request::builder()
        .method("POST")
        .uri("/functions/google-drive-download")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(rejected).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn failed_import_leaves_no_catalog_row() {
    let (dir, app) = app();
    let token = register(&app, "hal%40example.com").await;
    let (_, profile) = send(&app, authed("GET", "/api/me", &token, None)).await;
    let user_id = profile["id"].as_str().unwrap().to_string();
    send(
        &app,
        authed(
            "POST",
            "/api/link/google",
            &token,
            Some(json!({ "providerToken": "drive-token" })),
        ),
    )
    .await;

    // a directory where the storage file belongs makes every write fail
    let storage = dir.path().join(&user_id).join("storage.json.gz");
    std::fs::remove_file(&storage).unwrap();
    std::fs::create_dir(&storage).unwrap();

    let (status, _) = send(
        &app,
        authed(
            "POST",
            "/api/drive/import",
            &token,
            Some(json!({ "fileId": "csv-1", "fileName": "leads.csv", "mimeType": "text/csv" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, rows) = send(&app, authed("GET", "/api/files", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows, json!([]));
}
