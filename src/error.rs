//! Error types for keyword queries.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

/// Result type for query pipeline operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Every failure the query pipeline can report.
///
/// `Settings` and `Connection` abort a whole batch. Everything else is scoped to
/// the single query that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("error reading settings: {0}")]
    Settings(String),

    #[error("database connection failure: {0}")]
    Connection(String),

    #[error("malformed query payload: {0}")]
    MalformedQuery(String),

    #[error("malformed query identifier '{0}': expected service.keyword")]
    MalformedIdentifier(String),

    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Unknown unit conversion: {0}")]
    UnknownConversion(i64),

    #[error("query retrieval error: {0}")]
    Store(String),

    #[error("query scan error: {0}")]
    RowScan(String),

    #[error("row query error: {0}")]
    Cursor(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("query deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },
}

impl QueryError {
    pub fn settings<S: Into<String>>(message: S) -> Self {
        Self::Settings(message.into())
    }

    pub fn connection<E: ToString>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn store<E: ToString>(err: E) -> Self {
        Self::Store(err.to_string())
    }

    pub fn row_scan<E: ToString>(err: E) -> Self {
        Self::RowScan(err.to_string())
    }

    pub fn cursor<E: ToString>(err: E) -> Self {
        Self::Cursor(err.to_string())
    }

    pub fn invalid_identifier<S: Into<String>>(identifier: &str, reason: S) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that prevent any query in a batch from running
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, QueryError::Settings(_) | QueryError::Connection(_))
    }

    /// Error category for logs and API consumers
    pub fn category(&self) -> &'static str {
        match self {
            QueryError::Settings(_) => "settings",
            QueryError::Connection(_) => "connection",
            QueryError::MalformedQuery(_) => "malformed_query",
            QueryError::MalformedIdentifier(_) => "malformed_identifier",
            QueryError::InvalidIdentifier { .. } => "invalid_identifier",
            QueryError::UnknownConversion(_) => "unknown_conversion",
            QueryError::Store(_) => "store",
            QueryError::RowScan(_) => "row_scan",
            QueryError::Cursor(_) => "cursor",
            QueryError::Cancelled => "cancelled",
            QueryError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

// Per-query errors travel to the host as their message text.
impl Serialize for QueryError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Errors surfaced by the HTTP layer as `{"error": message}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("encoding failure: {0}")]
    Encoding(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Query(err) => match err {
                QueryError::Settings(_)
                | QueryError::MalformedQuery(_)
                | QueryError::MalformedIdentifier(_)
                | QueryError::InvalidIdentifier { .. }
                | QueryError::UnknownConversion(_) => StatusCode::BAD_REQUEST,
                QueryError::Cancelled | QueryError::DeadlineExceeded { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_fatal_errors_are_settings_and_connection() {
        assert!(QueryError::settings("missing server").is_batch_fatal());
        assert!(QueryError::connection("refused").is_batch_fatal());
        assert!(!QueryError::UnknownConversion(9).is_batch_fatal());
        assert!(!QueryError::row_scan("bad float").is_batch_fatal());
    }

    #[test]
    fn serializes_as_message() {
        let value = serde_json::to_value(QueryError::UnknownConversion(7)).unwrap();
        assert_eq!(value, json!("Unknown unit conversion: 7"));
    }

    #[test]
    fn api_error_status_codes() {
        let resp = ApiError::BadRequest("missing service".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(QueryError::settings("bad json")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(QueryError::connection("refused")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = ApiError::Encoding("oops".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
