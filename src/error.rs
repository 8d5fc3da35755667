//! # Error Handling
//!
//! Two error types live here:
//! - **AppError**: errors on the HTTP surface, converted to JSON responses
//! - **RelayError**: errors inside the relay core (upstream transport, protocol,
//!   buffering bounds, capacity)
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for Error Types**: each variant is one failure scenario, with data attached
//! - **From trait**: automatically converts between error types so `?` just works
//! - **ResponseError trait**: turns an error into an HTTP response
//! - **Display trait**: defines how errors are formatted as strings
//!
//! ## Relay failure policy:
//! Relay errors are never fatal for the process. They are logged where they
//! happen and only end the unit of work (a message, or at worst a session).

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **ServiceUnavailable**: The relay is at capacity (503 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// No capacity for another relay session
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent sessions (10) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::SessionLimit(_) => AppError::ServiceUnavailable(err.to_string()),
            RelayError::Configuration(msg) => AppError::ConfigError(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Errors raised by the relay core.
///
/// ## Mapping to the failure taxonomy:
/// - **Upstream**: transport or handshake failure on the upstream connection
/// - **Protocol**: upstream sent something that is not a well-formed event
/// - **BufferOverflow**: audio arrived while a buffering bound (frame buffer or upstream queue) was reached
/// - **SessionLimit**: no room for another downstream client
/// - **Configuration**: settings that cannot be turned into an upstream request
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    Upstream(String),
    Protocol(String),
    BufferOverflow { buffered: usize, incoming: usize, limit: usize },
    SessionLimit(usize),
    Configuration(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RelayError::BufferOverflow { buffered, incoming, limit } => write!(
                f,
                "Audio buffer full: {} bytes buffered, {} incoming, limit {}",
                buffered, incoming, limit
            ),
            RelayError::SessionLimit(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
            RelayError::Configuration(msg) => write!(f, "Relay configuration error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Upstream(err.to_string())
    }
}

/// Type alias for Results that use our HTTP error type.
pub type AppResult<T> = Result<T, AppError>;
