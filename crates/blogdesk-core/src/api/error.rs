use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    ServerError { status: StatusCode, message: String },

    #[error("Request failed ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Request cancelled")]
    Cancelled,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull the human-readable `detail` out of an error body.
    ///
    /// The server sends either `{"detail": "..."}` or, for validation
    /// failures, `{"detail": [{"msg": "..."}, ...]}`.
    pub fn extract_detail(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        match value.get("detail")? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items
                .iter()
                .find_map(|item| item.get("msg").and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::extract_detail(body).unwrap_or_else(|| Self::truncate_body(body));
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError { status, message },
            _ => ApiError::Rejected { status, message },
        }
    }

    /// Message suitable for showing to a user, without the variant prefix.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::NotFound(m)
            | ApiError::ServerError { message: m, .. }
            | ApiError::Rejected { message: m, .. }
                if !m.is_empty() =>
            {
                m.clone()
            }
            other => other.to_string(),
        }
    }

    /// HTTP status behind this error, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::ServerError { status, .. } | ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            ApiError::InvalidResponse(_) | ApiError::InvalidHeader(_) | ApiError::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_uses_detail_string() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"detail":"Username already taken"}"#);
        match err {
            ApiError::Rejected { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Username already taken");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_from_status_uses_first_validation_msg() {
        let body = r#"{"detail":[{"loc":["body","email"],"msg":"value is not a valid email address"}]}"#;
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(err.user_message(), "value is not a valid email address");
    }

    #[test]
    fn test_from_status_maps_unauthorized() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"detail":"Token expired"}"#);
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(err.user_message(), "Token expired");
    }

    #[test]
    fn test_from_status_plain_body_falls_back_to_text() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, ApiError::ServerError { ref message, .. } if message == "upstream down"));
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 510 total bytes"));
    }

    #[test]
    fn test_user_message_empty_detail_uses_display() {
        let err = ApiError::Unauthorized(String::new());
        assert_eq!(err.user_message(), "Unauthorized: ");
    }
}
