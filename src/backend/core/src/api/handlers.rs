//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, FollowError>` so that errors
//! are converted to HTTP status codes via the `IntoResponse` implementation on
//! `FollowError`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::domain::account::AccountView;
use crate::error::FollowError;
use crate::events::EntityId;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_followers": state.registry.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Prometheus metrics endpoint.
pub async fn prometheus_metrics() -> impl IntoResponse {
    let registry = crate::telemetry::metrics::MetricsRegistry::global();
    let body = registry.render();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entity Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct NotifyParams {
    /// Wait for the event to be applied before responding.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub entity_id: EntityId,
    pub confirmed: bool,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityStateResponse {
    pub entity_id: EntityId,
    pub version: u64,
    pub timestamp: u64,
    pub active: bool,
}

pub async fn notify_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Query(params): Query<NotifyParams>,
    body: Bytes,
) -> Result<impl IntoResponse, FollowError> {
    if body.is_empty() {
        return Err(FollowError::validation("Envelope body cannot be empty"));
    }
    let entity_id = EntityId::new(entity_id);

    let (follower, status) = if params.wait {
        let follower = state.registry.notify_confirmed(&entity_id, &body).await?;
        (follower, StatusCode::OK)
    } else {
        let follower = state.registry.notify(&entity_id, &body).await?;
        (follower, StatusCode::ACCEPTED)
    };

    let response = NotifyResponse {
        entity_id,
        confirmed: params.wait,
        version: follower.version(),
    };
    Ok((status, Json(ApiResponse::success(response))))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, FollowError> {
    let entity_id = EntityId::new(entity_id);
    let follow_state = state
        .registry
        .committed_state(&entity_id)
        .await?
        .ok_or_else(|| FollowError::entity_not_found(&entity_id))?;

    let response = EntityStateResponse {
        active: state.registry.is_active(&entity_id),
        entity_id,
        version: follow_state.version,
        timestamp: follow_state.timestamp,
    };
    Ok(Json(ApiResponse::success(response)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Account Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ApiResponse<AccountView>>, FollowError> {
    let account_id = EntityId::new(account_id);
    let view = state
        .accounts
        .get(&account_id)
        .ok_or_else(|| FollowError::entity_not_found(&account_id))?;

    Ok(Json(ApiResponse::success(view)))
}
