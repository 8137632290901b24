//! Integration tests for the admin HTTP surface.
//!
//! Requests are driven through the real router with `oneshot`; the database is
//! an in-memory SQLite pool with the guard triggers installed.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use configgate::config::DatabaseConfig;
use configgate::crypto::{CipherBox, EncryptionKey, KeySource};
use configgate::db::{self, ConfigStore, DbPool, SqliteAuditLog, SqliteConfigStore};
use configgate::settings::default_entries;
use configgate::sqlite_gate;
use configgate::web::{create_router, AppState, ACTOR_HEADER};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup(cipher: CipherBox) -> (Router, DbPool) {
    let pool = db::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
    .expect("in-memory database");

    let state = AppState {
        gate: Arc::new(sqlite_gate(&pool, Arc::new(cipher))),
        audit: Arc::new(SqliteAuditLog::new(pool.clone())),
    };
    (create_router(state), pool)
}

fn test_cipher() -> CipherBox {
    CipherBox::new(&EncryptionKey::from_bytes([42u8; 32]), KeySource::Base64)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn put(uri: &str, actor: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn with_actor(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(ACTOR_HEADER, "admin")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _pool) = setup(test_cipher()).await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_encryption_health() {
    let (app, _pool) = setup(test_cipher()).await;
    let (status, body) = send(&app, get("/health/encryption")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "available": true, "key_source": "base64", "self_test": true }));

    let (app, _pool) = setup(CipherBox::unavailable()).await;
    let (_, body) = send(&app, get("/health/encryption")).await;
    assert_eq!(body["available"], false);
    assert_eq!(body["key_source"], "unavailable");
}

#[tokio::test]
async fn test_put_and_get_plain_setting() {
    let (app, _pool) = setup(test_cipher()).await;

    let (status, body) = send(
        &app,
        put("/config/GENERAL/app_name", Some("admin"), json!({ "value": "Luna" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_encrypted"], false);
    assert_eq!(body["created"], true);

    let (status, body) = send(&app, get("/config/GENERAL/app_name")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_value"], "Luna");
    assert_eq!(body["value_kind"], "str");
}

#[tokio::test]
async fn test_secret_never_leaves_the_server() {
    let (app, pool) = setup(test_cipher()).await;

    let (status, body) = send(
        &app,
        put(
            "/config/SMTP/smtp_password",
            Some("admin"),
            json!({ "value": "s3cr3t!", "description": "Mail relay" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_encrypted"], true);

    let token = SqliteConfigStore::new(pool.clone())
        .get("SMTP", "smtp_password")
        .await
        .unwrap()
        .unwrap()
        .config_value;

    for uri in ["/config/SMTP/smtp_password", "/config", "/audit"] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        let text = body.to_string();
        assert!(!text.contains("s3cr3t!"), "{uri} leaked the secret");
        assert!(!text.contains(&token), "{uri} leaked the ciphertext");
    }

    let (_, body) = send(&app, get("/config/SMTP/smtp_password")).await;
    assert_eq!(body["display_value"], "s3cr***");
    assert_eq!(body["is_sensitive"], true);
    assert_eq!(body["description"], "Mail relay");
}

#[tokio::test]
async fn test_write_without_actor_is_rejected() {
    let (app, _pool) = setup(test_cipher()).await;
    let (status, _) = send(
        &app,
        put("/config/GENERAL/app_name", None, json!({ "value": "Luna" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refused_secret_returns_forbidden() {
    let (app, pool) = setup(CipherBox::unavailable()).await;

    let (status, body) = send(
        &app,
        put("/config/SMTP/smtp_password", Some("admin"), json!({ "value": "hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "cipher_unavailable");
    assert!(!body.to_string().contains("hunter2"));

    let row = SqliteConfigStore::new(pool)
        .get("SMTP", "smtp_password")
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn test_typed_values() {
    let (app, _pool) = setup(test_cipher()).await;

    let (status, body) = send(
        &app,
        put("/config/SMTP/smtp_port", Some("admin"), json!({ "value": 587 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value_kind"], "int");

    let (_, body) = send(&app, get("/config/SMTP/smtp_port")).await;
    assert_eq!(body["display_value"], "587");
}

#[tokio::test]
async fn test_delete_setting() {
    let (app, _pool) = setup(test_cipher()).await;
    send(
        &app,
        put("/config/GENERAL/app_name", Some("admin"), json!({ "value": "Luna" })),
    )
    .await;

    let (status, _) = send(&app, with_actor(Method::DELETE, "/config/GENERAL/app_name")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, with_actor(Method::DELETE, "/config/GENERAL/app_name")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/config/GENERAL/app_name")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reset_to_defaults() {
    let (app, _pool) = setup(test_cipher()).await;
    send(
        &app,
        put("/config/GENERAL/custom", Some("admin"), json!({ "value": true })),
    )
    .await;

    let (status, body) = send(&app, with_actor(Method::POST, "/config/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], default_entries().len());

    let (status, _) = send(&app, get("/config/GENERAL/custom")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, get("/audit?limit=1")).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["action"], "RESET_CONFIG_DEFAULTS");
}

#[tokio::test]
async fn test_audit_lists_redacted_entries() {
    let (app, _pool) = setup(test_cipher()).await;
    send(
        &app,
        put("/config/API/openai_api_key", Some("ops"), json!({ "value": "sk-verysecret" })),
    )
    .await;

    let (status, body) = send(&app, get("/audit")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["actor"], "ops");
    assert_eq!(entries[0]["action"], "CREATE_CONFIG");
    assert_eq!(entries[0]["new_value"], "[SENSITIVE]");
}

#[tokio::test]
async fn test_storage_failure_is_generic() {
    let (app, pool) = setup(test_cipher()).await;
    pool.close().await;

    let (status, body) = send(
        &app,
        put("/config/GENERAL/app_name", Some("admin"), json!({ "value": "Luna" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "storage unavailable, try again");
}
