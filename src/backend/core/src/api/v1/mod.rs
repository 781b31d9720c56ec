//! V1 API.

pub mod routes;

pub use routes::v1_router;
