use crate::crypto::KeySource;
use crate::db::{AuditLogEntry, SqliteAuditLog};
use crate::error::{AppError, AppResult};
use crate::settings::{default_entries, ConfigGate, ConfigView, ResetOutcome, SaveOutcome, SavedEntry};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use configgate_types::ConfigValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Header naming the administrator performing a write
pub const ACTOR_HEADER: &str = "x-actor-id";

const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 500;

/// Shared state for the admin HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<ConfigGate>,
    pub audit: Arc<SqliteAuditLog>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct EncryptionHealth {
    pub available: bool,
    pub key_source: KeySource,
    pub self_test: bool,
}

/// Cipher status, for operators
pub async fn encryption_health(State(state): State<AppState>) -> Json<EncryptionHealth> {
    let cipher = state.gate.cipher();
    Json(EncryptionHealth {
        available: cipher.is_available(),
        key_source: cipher.key_source(),
        self_test: cipher.self_test(),
    })
}

/// All active settings, masked
pub async fn list_config(
    State(state): State<AppState>,
) -> AppResult<Json<BTreeMap<String, Vec<ConfigView>>>> {
    Ok(Json(state.gate.read_all().await?))
}

pub async fn get_config(
    Path((category, key)): Path<(String, String)>,
    State(state): State<AppState>,
) -> AppResult<Json<ConfigView>> {
    state
        .gate
        .read(&category, &key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{category}.{key}")))
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    pub value: ConfigValue,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn put_config(
    Path((category, key)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateConfigRequest>,
) -> AppResult<Json<SavedEntry>> {
    let actor = actor_from(&headers)?;
    let outcome = state
        .gate
        .save_with_description(
            &category,
            &key,
            request.value,
            request.description.as_deref(),
            &actor,
        )
        .await?;

    match outcome {
        SaveOutcome::Persisted(saved) => Ok(Json(saved)),
        SaveOutcome::Refused(refusal) => Err(AppError::Refused(refusal)),
    }
}

pub async fn delete_config(
    Path((category, key)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let actor = actor_from(&headers)?;
    if state.gate.delete(&category, &key, &actor).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("{category}.{key}")))
    }
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub applied: usize,
}

pub async fn reset_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<ResetResponse>> {
    let actor = actor_from(&headers)?;
    match state.gate.reset_to_defaults(&default_entries(), &actor).await? {
        ResetOutcome::Applied { count } => {
            info!(actor = %actor, count, "Reset requested over HTTP");
            Ok(Json(ResetResponse { applied: count }))
        }
        ResetOutcome::Refused(refusal) => Err(AppError::Refused(refusal)),
    }
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// Recent audit entries; values are already redacted at write time
pub async fn list_audit(
    Query(query): Query<AuditQuery>,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(state.audit.recent(limit).await?))
}

fn actor_from(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("missing {ACTOR_HEADER} header")))
}

/// Create the admin router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/encryption", get(encryption_health))
        .route("/config", get(list_config))
        .route("/config/reset", post(reset_config))
        .route(
            "/config/{category}/{key}",
            get(get_config).put(put_config).delete(delete_config),
        )
        .route("/audit", get(list_audit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
