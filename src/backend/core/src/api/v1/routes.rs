//! V1 API routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/`.
///
/// # Endpoints
///
/// ## Entities
/// - `POST /api/v1/entities/:entity_id/events` - Notify an entity with an envelope (`?wait=true` to await application)
/// - `GET /api/v1/entities/:entity_id` - Committed state of an entity
///
/// ## Accounts
/// - `GET /api/v1/accounts/:account_id` - Account read model
pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/entities/:entity_id/events", post(handlers::notify_entity))
        .route("/entities/:entity_id", get(handlers::get_entity))
        .route("/accounts/:account_id", get(handlers::get_account))
}
