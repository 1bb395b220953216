use std::fmt;
use thiserror::Error;

/// Terminal status of an operation, and the classification of every HTTP
/// status the dispatcher can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 200
    Ok,
    /// 201
    Created,
    /// 204
    NoContent,
    /// 302, the resource lives at the URL given in `Location`
    TemporarilyMoved,
    /// 400
    BadRequest,
    /// 401, the access token is invalid or expired
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 409 (and 412, a failed `If-Match` precondition)
    Conflict,
    /// 410
    Gone,
    /// 500 and every status without a dedicated code
    InternalError,
    /// The HTTP exchange succeeded but the payload could not be decoded
    InvalidResponse,
    /// Connection, DNS or TLS failure
    TransportError,
    /// The operation was aborted by the caller
    Cancelled,
}

impl ErrorCode {
    /// Map an HTTP status code to its `ErrorCode`.
    ///
    /// The mapping is total: anything without a dedicated variant becomes
    /// `InternalError`. Use [`JobError::from_status`] to keep the raw code in
    /// the message.
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => ErrorCode::Ok,
            201 => ErrorCode::Created,
            204 => ErrorCode::NoContent,
            302 => ErrorCode::TemporarilyMoved,
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 | 412 => ErrorCode::Conflict,
            410 => ErrorCode::Gone,
            _ => ErrorCode::InternalError,
        }
    }

    /// `Ok`, `Created` and `NoContent` are the only non-error terminal codes.
    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Ok | ErrorCode::Created | ErrorCode::NoContent)
    }

    /// Short human-readable description used as the prefix of error messages
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Created => "Created",
            ErrorCode::NoContent => "No content",
            ErrorCode::TemporarilyMoved => "Too many redirects",
            ErrorCode::BadRequest => "Bad request",
            ErrorCode::Unauthorized => "Invalid authentication",
            ErrorCode::Forbidden => "Requested resource is forbidden",
            ErrorCode::NotFound => "Requested resource does not exist",
            ErrorCode::Conflict => "Conflict, remote resource is newer than local",
            ErrorCode::Gone => "Requested resource does not exist anymore",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::InvalidResponse => "Invalid response",
            ErrorCode::TransportError => "Network error",
            ErrorCode::Cancelled => "Operation cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The single error an operation terminates with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        JobError {
            code,
            message: message.into(),
        }
    }

    /// Build the terminal error for a non-2xx reply. The server's own
    /// explanation is extracted from `body` when it is a JSON error
    /// envelope; unmapped statuses keep the raw code in the message.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let code = ErrorCode::from_status(status);
        let server = parse_error_message(body);
        let message = match (code, server.is_empty()) {
            (ErrorCode::InternalError, true) => format!("HTTP status {}", status),
            (ErrorCode::InternalError, false) => {
                format!("HTTP status {}, server replied '{}'", status, server)
            }
            (_, true) => code.description().to_string(),
            (_, false) => format!("server replied '{}'", server),
        };
        JobError { code, message }
    }

    pub fn cancelled() -> Self {
        JobError::new(ErrorCode::Cancelled, "operation was aborted")
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        JobError::new(ErrorCode::InvalidResponse, message)
    }
}

/// Extract `error.message` (or a top-level `message`) from a JSON error
/// body, falling back to the body text.
pub fn parse_error_message(body: &[u8]) -> String {
    let raw = || String::from_utf8_lossy(body).trim().to_string();

    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return raw(),
    };

    let envelope = match value.get("error") {
        Some(inner) if inner.is_object() => inner,
        Some(serde_json::Value::String(s)) => return s.clone(),
        _ => &value,
    };

    envelope
        .get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(raw)
}

/// Main error type for the library's fallible building blocks
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure reported by a `Transport` implementation
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Request building error
    #[error("failed to build request: {0}")]
    RequestBuild(String),

    /// Payload decoding error
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Token endpoint rejected the refresh
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// The dispatcher task is gone
    #[error("dispatcher has shut down")]
    DispatcherClosed,

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// Failure to complete an HTTP exchange at all (no status was received).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

/// Failure to turn a successful reply into items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

impl From<quick_xml::DeError> for DecodeError {
    fn from(err: quick_xml::DeError) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

impl From<DecodeError> for JobError {
    fn from(err: DecodeError) -> Self {
        JobError::invalid_response(err.to_string())
    }
}

impl From<TransportError> for JobError {
    fn from(err: TransportError) -> Self {
        JobError::new(ErrorCode::TransportError, err.0)
    }
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::from_status(200), ErrorCode::Ok);
        assert_eq!(ErrorCode::from_status(201), ErrorCode::Created);
        assert_eq!(ErrorCode::from_status(204), ErrorCode::NoContent);
        assert_eq!(ErrorCode::from_status(302), ErrorCode::TemporarilyMoved);
        assert_eq!(ErrorCode::from_status(401), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(412), ErrorCode::Conflict);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::InternalError);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::InternalError);
    }

    #[test]
    fn test_only_2xx_are_success() {
        assert!(ErrorCode::Ok.is_success());
        assert!(ErrorCode::NoContent.is_success());
        assert!(!ErrorCode::TemporarilyMoved.is_success());
        assert!(!ErrorCode::Cancelled.is_success());
    }

    #[test]
    fn test_unmapped_status_keeps_raw_code() {
        let err = JobError::from_status(503, b"");
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(err.message.contains("503"));
    }

    #[test]
    fn test_error_message_from_envelope() {
        let body = br#"{"error": {"code": 404, "message": "Task not found"}}"#;
        let err = JobError::from_status(404, body);
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.message, "server replied 'Task not found'");
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(parse_error_message(br#"{"message": "nope"}"#), "nope");
        assert_eq!(parse_error_message(br#"{"error": "invalid_grant"}"#), "invalid_grant");
        assert_eq!(parse_error_message(b"<html>oops</html>"), "<html>oops</html>");
    }
}
