//! HTTP ingress for the follow server.
//!
//! Envelopes are posted as raw bytes to `/api/v1/entities/:entity_id/events`
//! and routed to the entity's follower through the [`FollowerRegistry`].
//! State and the account read model can be queried back.

mod handlers;
pub mod v1;

use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::domain::account::{AccountEvent, AccountReadModel};
use crate::registry::FollowerRegistry;

pub use handlers::{EntityStateResponse, NotifyParams, NotifyResponse};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FollowerRegistry<AccountEvent>>,
    pub accounts: Arc<AccountReadModel>,
}

/// Build the API router.
///
/// - `/health` and `/metrics` (unversioned)
/// - V1 routes under `/api/v1/`
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest(v1::routes::V1_PREFIX, v1::v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper for successful requests. Failures are answered with
/// the error's own body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
    }
}
