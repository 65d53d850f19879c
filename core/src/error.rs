//! Relay error taxonomy
//! Every failure of the upload pipeline ends up here and is rendered as a
//! structured response; nothing escapes the handler as a panic.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Client sent something unusable (no file, unreadable form)
    #[error("{0}")]
    BadRequest(String),

    /// Inbound multipart body could not be read; keeps the extractor's status
    /// so an oversized upload answers 413
    #[error("{message}")]
    UploadRejected { status: StatusCode, message: String },

    /// Relay is missing required configuration; no network call was made
    #[error("{0}")]
    Misconfigured(String),

    /// Anonymous free-tier usage exhausted
    #[error("Free limit reached ({used}/{limit}). Create an account or see the pricing page.")]
    QuotaExceeded { used: u32, limit: u32 },

    /// Upstream answered with a non-2xx status; forwarded as-is
    #[error("Upstream error {status}")]
    UpstreamRejected {
        status: StatusCode,
        content_type: Option<String>,
        body: Bytes,
    },

    /// Upstream answered 2xx but the payload cannot be a processed document
    #[error("{0}")]
    MalformedUpstream(String),

    /// Upstream never produced a response
    #[error("Upstream unreachable after {attempts} attempt(s): {source}")]
    Unreachable {
        attempts: u32,
        timed_out: bool,
        #[source]
        source: reqwest::Error,
    },
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::UploadRejected { status, .. } => *status,
            RelayError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            RelayError::UpstreamRejected { status, .. } => *status,
            RelayError::MalformedUpstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Unreachable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message shown to the browser
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Unreachable { attempts, timed_out: true, .. } => format!(
                "The processing service timed out after {} attempt(s). It is probably cold-starting, please retry in a minute.",
                attempts
            ),
            RelayError::Unreachable { attempts, source, .. } => format!(
                "The processing service could not be reached after {} attempt(s) (it may be cold-starting): {}",
                attempts, source
            ),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            RelayError::UpstreamRejected { status, content_type, body } => {
                if body.iter().all(|b| b.is_ascii_whitespace()) {
                    let message = format!("Upstream error {}", status.as_u16());
                    return (status, Json(json!({ "error": message }))).into_response();
                }

                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
                    return (status, Json(value)).into_response();
                }

                let content_type = content_type
                    .filter(|ct| !ct.to_ascii_lowercase().contains("json"))
                    .and_then(|ct| HeaderValue::from_str(&ct).ok())
                    .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));

                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            other => {
                let body = json!({ "error": other.user_message() });
                (status, Json(body)).into_response()
            }
        }
    }
}
