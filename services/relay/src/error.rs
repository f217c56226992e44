//! Relay errors and their HTTP rendering.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlrelay_validation::RejectReason;
use thiserror::Error;

/// Relay errors. None of them is retried.
#[derive(Debug, Error)]
pub enum RelayError {
    /// HTTP client could not be built.
    #[error("failed to build downstream client: {0}")]
    Client(#[source] reqwest::Error),

    /// Downstream hop failed or timed out.
    #[error("downstream request to {url} failed: {source}")]
    Downstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Inbound body exceeded the configured limit or could not be read.
    #[error("request body rejected: {0}")]
    Body(String),

    /// Validator refused the request.
    #[error("invalid request: {0}")]
    Rejected(RejectReason),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Client(_) | Self::Downstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Body(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Client(_) | Self::Downstream { .. } => "upstream_unavailable",
            Self::Body(_) => "payload_too_large",
            Self::Rejected(reason) => reason.code(),
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "Invalid Request",
            _ => self.status().canonical_reason().unwrap_or("Unknown Error"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Transport details stay in the logs.
        let detail = match &self {
            Self::Client(_) | Self::Downstream { .. } => "downstream stage unavailable".to_string(),
            other => other.to_string(),
        };

        let problem = ProblemDetails {
            r#type: format!("https://sqlrelay.dev/problems/{code}"),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail,
            code: code.to_string(),
        };

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_invalid_request() {
        let err = RelayError::Rejected(RejectReason::UnrecognizedStatement);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "unrecognized_statement");
        assert_eq!(err.title(), "Invalid Request");
    }

    #[test]
    fn test_body_error_is_payload_too_large() {
        let err = RelayError::Body("length limit exceeded".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
