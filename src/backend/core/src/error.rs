//! Error handling for the follower core.
//!
//! This module provides:
//! - A single error type with machine-readable codes and chained sources
//! - HTTP status code mapping for the ingress API
//! - User-facing vs internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for follower operations.
pub type Result<T> = std::result::Result<T, FollowError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and returned to HTTP clients alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Delivery Errors (1000-1099)
    ChannelUnavailable,
    ProcessTimeout,
    ApplicationFailed,

    // Envelope Errors (1100-1199)
    SerializationError,
    DeserializationError,
    UnknownEventType,

    // Storage Errors (2000-2099)
    EventStoreError,
    SnapshotStoreError,
    DatabaseError,

    // Request Errors (4000-4099)
    EntityNotFound,
    ValidationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ChannelUnavailable => 1000,
            Self::ProcessTimeout => 1001,
            Self::ApplicationFailed => 1002,

            Self::SerializationError => 1100,
            Self::DeserializationError => 1101,
            Self::UnknownEventType => 1102,

            Self::EventStoreError => 2000,
            Self::SnapshotStoreError => 2001,
            Self::DatabaseError => 2002,

            Self::EntityNotFound => 4000,
            Self::ValidationError => 4001,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::EntityNotFound => StatusCode::NOT_FOUND,

            Self::DeserializationError
            | Self::UnknownEventType
            | Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            Self::ChannelUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            Self::ProcessTimeout => StatusCode::GATEWAY_TIMEOUT,

            Self::ApplicationFailed
            | Self::SerializationError
            | Self::EventStoreError
            | Self::SnapshotStoreError
            | Self::DatabaseError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChannelUnavailable
                | Self::ProcessTimeout
                | Self::EventStoreError
                | Self::SnapshotStoreError
                | Self::DatabaseError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ChannelUnavailable | Self::ProcessTimeout | Self::ApplicationFailed => {
                "delivery"
            }
            Self::SerializationError | Self::DeserializationError | Self::UnknownEventType => {
                "envelope"
            }
            Self::EventStoreError | Self::SnapshotStoreError | Self::DatabaseError => "storage",
            Self::EntityNotFound | Self::ValidationError => "request",
            Self::ConfigurationError => "configuration",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        write!(f, "{}", s.trim_matches('"'))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity levels for error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected under load, no action needed
    Low,
    /// Degraded delivery, watch it
    Medium,
    /// A batch or request failed
    High,
    /// The process cannot serve traffic
    Critical,
}

impl ErrorSeverity {
    /// Derive severity from error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::EntityNotFound
            | ErrorCode::ValidationError
            | ErrorCode::DeserializationError
            | ErrorCode::UnknownEventType => Self::Low,

            ErrorCode::ChannelUnavailable | ErrorCode::ProcessTimeout => Self::Medium,

            ErrorCode::ApplicationFailed
            | ErrorCode::SerializationError
            | ErrorCode::EventStoreError
            | ErrorCode::SnapshotStoreError
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => Self::High,

            ErrorCode::ConfigurationError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured details attached to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Arbitrary key/value context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Entity the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for the follower core.
///
/// Every failure a producer can observe, whether returned from ingress or
/// delivered through a completion handle, is a `FollowError`.
#[derive(Error, Debug)]
pub struct FollowError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for FollowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl FollowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Attach the entity identity.
    pub fn with_entity(mut self, entity_id: impl fmt::Display) -> Self {
        self.details.entity_id = Some(entity_id.to_string());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let entity_id = self.details.entity_id.as_deref().unwrap_or("-");

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    entity_id = entity_id,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    entity_id = entity_id,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    entity_id = entity_id,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    entity_id = entity_id,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "follow_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl FollowError {
    /// The channel refused a write (closed, completed, or full past the write timeout).
    pub fn channel_unavailable(entity_id: impl fmt::Display) -> Self {
        let entity_id = entity_id.to_string();
        Self::new(
            ErrorCode::ChannelUnavailable,
            format!("Event channel unavailable for entity {}", entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(entity_id))
    }

    /// A batch did not finish applying before the deadline.
    pub fn process_timeout(entity_id: impl fmt::Display, timeout: Duration) -> Self {
        let entity_id = entity_id.to_string();
        Self::new(
            ErrorCode::ProcessTimeout,
            format!(
                "Event processing timed out after {}ms",
                timeout.as_millis()
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity(entity_id)
                .with_context("timeout_ms", timeout.as_millis() as u64),
        )
    }

    /// An application handler returned an error or panicked.
    pub fn application_failed(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ApplicationFailed,
            "Event application failed",
            message,
        )
    }

    /// The envelope named a type that was never registered.
    pub fn unknown_event_type(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self::new(
            ErrorCode::UnknownEventType,
            format!("Unknown event type: {}", type_name),
        )
        .with_context("type_name", type_name)
    }

    /// The event store returned something other than the requested gapless run.
    pub fn event_store(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::EventStoreError,
            "Event store read failed",
            message,
        )
    }

    /// Snapshot load or save failed.
    pub fn snapshot_store(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::SnapshotStoreError,
            "Snapshot store operation failed",
            message,
        )
    }

    /// No state exists for the entity.
    pub fn entity_not_found(entity_id: impl fmt::Display) -> Self {
        let entity_id = entity_id.to_string();
        Self::new(
            ErrorCode::EntityNotFound,
            format!("Entity not found: {}", entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(entity_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error message
    pub error: String,

    /// Machine-readable code
    pub error_code: String,

    /// Numeric code
    pub numeric_code: u32,

    /// Whether retrying may succeed
    pub retryable: bool,
}

impl From<&FollowError> for ErrorResponse {
    fn from(error: &FollowError) -> Self {
        Self {
            success: false,
            error: error.user_message().to_string(),
            error_code: error.code().to_string(),
            numeric_code: error.code().numeric_code(),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for FollowError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.http_status();
        let body = ErrorResponse::from(&self);
        (status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for FollowError {
    fn from(error: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let code = match error.classify() {
            Category::Io => ErrorCode::SerializationError,
            Category::Syntax | Category::Data | Category::Eof => ErrorCode::DeserializationError,
        };

        Self::with_internal(code, "Malformed event payload", error.to_string()).with_source(error)
    }
}

impl From<base64::DecodeError> for FollowError {
    fn from(error: base64::DecodeError) -> Self {
        Self::with_internal(
            ErrorCode::DeserializationError,
            "Malformed envelope bytes",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<sqlx::Error> for FollowError {
    fn from(error: sqlx::Error) -> Self {
        let user_msg = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => "Database connection failed",
            sqlx::Error::RowNotFound => "Record not found",
            _ => "Database operation failed",
        };

        Self::with_internal(ErrorCode::DatabaseError, user_msg, error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for FollowError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::task::JoinError> for FollowError {
    fn from(error: tokio::task::JoinError) -> Self {
        let message = if error.is_panic() {
            "event handler panicked"
        } else {
            "event handler task was cancelled"
        };
        Self::application_failed(format!("{}: {}", message, error))
    }
}

impl From<anyhow::Error> for FollowError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<FollowError>() {
            Ok(follow_error) => follow_error,
            Err(error) => Self::internal(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::ChannelUnavailable.to_string(), "CHANNEL_UNAVAILABLE");
        assert_eq!(ErrorCode::ProcessTimeout.to_string(), "PROCESS_TIMEOUT");
    }

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::ChannelUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::UnknownEventType.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::ProcessTimeout.http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::ProcessTimeout.is_retryable());
        assert!(ErrorCode::ChannelUnavailable.is_retryable());
        assert!(!ErrorCode::UnknownEventType.is_retryable());
        assert!(!ErrorCode::ApplicationFailed.is_retryable());
    }

    #[test]
    fn test_channel_unavailable_carries_entity() {
        let err = FollowError::channel_unavailable("account-7");
        assert_eq!(err.code(), ErrorCode::ChannelUnavailable);
        assert_eq!(err.details().entity_id.as_deref(), Some("account-7"));
        assert!(err.to_string().contains("account-7"));
    }

    #[test]
    fn test_process_timeout_context() {
        let err = FollowError::process_timeout("a", Duration::from_secs(2));
        assert_eq!(err.code(), ErrorCode::ProcessTimeout);
        assert_eq!(err.details().context["timeout_ms"], 2000);
    }

    #[test]
    fn test_serde_json_error_maps_to_deserialization() {
        let err: FollowError = serde_json::from_str::<u64>("not json").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }

    #[test]
    fn test_option_context() {
        let value: Option<u32> = None;
        let err = value.context("missing value").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.internal_message(), Some("missing value"));
    }

    #[test]
    fn test_error_response_from_error() {
        let err = FollowError::unknown_event_type("Mystery");
        let response = ErrorResponse::from(&err);
        assert!(!response.success);
        assert_eq!(response.error_code, "UNKNOWN_EVENT_TYPE");
        assert_eq!(response.numeric_code, 1102);
        assert!(!response.retryable);
    }
}
