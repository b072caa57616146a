use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for refresh operations
pub type Result<T, E = RefreshError> = std::result::Result<T, E>;

const BODY_SNIPPET_LEN: usize = 500;

/// Errors that can abort a refresh invocation
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("upstream {url} returned {code} {status}")]
    UpstreamUnavailable {
        url: String,
        code: u16,
        status: String,
        body: String,
    },

    /// The payload parsed but does not have the expected structure. Usually
    /// means the upstream layout changed.
    #[error("malformed upstream payload: {0}")]
    MalformedShape(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("annotation service returned {code}")]
    EnrichmentFailure { code: u16, body: String },

    #[error("a refresh of {0} is already in progress")]
    ConcurrentRefresh(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured error reported to the caller of a refresh.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub code: u16,
    pub status: String,
    pub body: String,
}

impl RefreshError {
    pub fn payload(&self) -> ErrorPayload {
        let (code, status, body) = match self {
            RefreshError::UpstreamUnavailable {
                code, status, body, ..
            } => (*code, status.clone(), body.as_str()),
            RefreshError::EnrichmentFailure { code, body } => {
                (*code, "Enrichment Failed".to_string(), body.as_str())
            }
            RefreshError::ConcurrentRefresh(_) => (409, "Conflict".to_string(), ""),
            _ => (500, "Internal Server Error".to_string(), ""),
        };

        let body = if body.is_empty() {
            self.to_string()
        } else {
            snippet(body)
        };

        ErrorPayload { code, status, body }
    }
}

fn snippet(body: &str) -> String {
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_payload_truncates_body() {
        let err = RefreshError::UpstreamUnavailable {
            url: "https://example.gov.in".into(),
            code: 503,
            status: "Service Unavailable".into(),
            body: "x".repeat(2000),
        };
        let payload = err.payload();
        assert_eq!(payload.code, 503);
        assert_eq!(payload.status, "Service Unavailable");
        assert_eq!(payload.body.len(), BODY_SNIPPET_LEN);
    }

    #[test]
    fn test_malformed_payload_uses_message() {
        let err = RefreshError::MalformedShape("response not an array".into());
        let payload = err.payload();
        assert_eq!(payload.code, 500);
        assert_eq!(
            payload.body,
            "malformed upstream payload: response not an array"
        );
    }

    #[test]
    fn test_concurrent_refresh_is_conflict() {
        let payload = RefreshError::ConcurrentRefresh("official").payload();
        assert_eq!(payload.code, 409);
        assert!(payload.body.contains("official"));
    }
}
