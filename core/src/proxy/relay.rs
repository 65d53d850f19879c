//! Upload relay pipeline
//! config check -> form -> quota -> warm-up -> route -> send -> inspect -> respond

use axum::{
    extract::{multipart::MultipartRejection, Multipart},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::time::Duration;

use crate::error::RelayError;
use crate::proxy::config::{media_type, RelayPolicy};
use crate::proxy::routes::Endpoint;
use crate::proxy::server::AppState;
use crate::proxy::upload::{UploadForm, UploadRequest};
use crate::proxy::upstream::client::UpstreamClient;

const DIAGNOSTIC_MAX_CHARS: usize = 300;

pub async fn relay_upload(
    state: &AppState,
    endpoint: Endpoint,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, RelayError> {
    let target = state.upstream_config.target()?;
    let policy = state.policy.as_ref();

    let multipart = multipart.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let request = UploadRequest::from_form(UploadForm::read(multipart).await?, endpoint)?;

    let used = state.quota.usage(headers);
    state.quota.check(used)?;

    tracing::info!(
        "Relaying {} via /api/{} ({} bytes, mode={}, lang={}, strictPdf={})",
        request.file.file_name,
        endpoint.as_str(),
        request.file.bytes.len(),
        request.mode.as_str(),
        request.lang,
        request.strict_pdf
    );

    if policy.warmup_enabled {
        let warmup_url = UpstreamClient::build_url(&target.base_url, &policy.warmup_path);
        state
            .upstream
            .spawn_warmup(warmup_url, Duration::from_secs(policy.warmup_timeout_secs));
    }

    let url = UpstreamClient::build_url(&target.base_url, policy.routes.path_for(request.mode));
    let reply = state
        .upstream
        .post_document(&url, &target, &request, policy)
        .await?;
    let attempts = reply.attempts;

    let status = reply.response.status();
    let content_type = header_string(reply.response.headers(), header::CONTENT_TYPE);
    let content_disposition = header_string(reply.response.headers(), header::CONTENT_DISPOSITION);

    // Buffer fully: the size check needs the whole payload before anything reaches the client
    let body = reply
        .response
        .bytes()
        .await
        .map_err(|e| RelayError::Unreachable {
            attempts,
            timed_out: e.is_timeout(),
            source: e,
        })?;

    if !status.is_success() {
        tracing::error!("Upstream error {}: {}", status, diagnostic_text(&body));
        return Err(RelayError::UpstreamRejected {
            status,
            content_type,
            body,
        });
    }

    inspect_success(content_type.as_deref(), &body, policy)?;

    // inspect_success guarantees a content type is present
    let content_type = content_type.unwrap_or_default();
    let disposition = attachment_disposition(
        content_disposition.as_deref(),
        &content_type,
        &request.file.file_name,
    );

    tracing::info!(
        "Upstream delivered {} bytes ({}) after {} attempt(s)",
        body.len(),
        content_type,
        attempts
    );

    let mut response = (StatusCode::OK, body).into_response();
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, to_header_value(content_type)?);
    out.insert(header::CONTENT_DISPOSITION, to_header_value(disposition)?);
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    out.insert("x-docsafe-attempts", HeaderValue::from(attempts));

    if state.quota.is_enabled() {
        let next = used.saturating_add(1);
        out.insert(header::SET_COOKIE, to_header_value(state.quota.cookie_for(next))?);
        out.insert("x-docsafe-free-remaining", HeaderValue::from(state.quota.remaining(next)));
    }

    Ok(response)
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn to_header_value(value: String) -> Result<HeaderValue, RelayError> {
    HeaderValue::try_from(value)
        .map_err(|e| RelayError::MalformedUpstream(format!("Upstream returned an invalid header: {}", e)))
}

/// Reject 2xx payloads that cannot be a processed document
pub fn inspect_success(
    content_type: Option<&str>,
    body: &[u8],
    policy: &RelayPolicy,
) -> Result<(), RelayError> {
    let content_type = content_type.unwrap_or("");
    if !policy.accepts(content_type) {
        let declared = if content_type.is_empty() { "no content type" } else { content_type };
        tracing::error!("Upstream answered 2xx with unexpected {}", declared);
        return Err(RelayError::MalformedUpstream(format!(
            "Processing service returned {} instead of a document: {}",
            declared,
            diagnostic_text(body)
        )));
    }

    if body.len() < policy.min_body_bytes {
        tracing::error!(
            "Upstream payload too small: {} bytes (minimum {})",
            body.len(),
            policy.min_body_bytes
        );
        let mut message = format!(
            "Processing service returned an undersized payload ({} bytes, expected at least {}); the processing most likely timed out",
            body.len(),
            policy.min_body_bytes
        );
        if let Ok(text) = std::str::from_utf8(body) {
            let printable = text.chars().all(|c| !c.is_control() || c.is_whitespace());
            if printable && !text.trim().is_empty() {
                message.push_str(": ");
                message.push_str(&diagnostic_text(body));
            }
        }
        return Err(RelayError::MalformedUpstream(message));
    }

    Ok(())
}

/// Human-readable digest of an upstream body for error messages
pub fn diagnostic_text(body: &[u8]) -> String {
    let text = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => ["error", "detail", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(|s| s.to_string()))
            .unwrap_or_else(|| value.to_string()),
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };

    if text.is_empty() {
        return "empty body".to_string();
    }
    if text.chars().count() > DIAGNOSTIC_MAX_CHARS {
        let truncated: String = text.chars().take(DIAGNOSTIC_MAX_CHARS).collect();
        return format!("{}...", truncated);
    }
    text
}

/// Always an attachment. The file name comes from the upstream disposition
/// when it carries a usable one, otherwise it is derived from the uploaded
/// file's name and the delivered content type.
pub fn attachment_disposition(upstream: Option<&str>, content_type: &str, original_name: &str) -> String {
    let name = upstream.and_then(disposition_file_name).unwrap_or_else(|| {
        let (stem, original_ext) = split_file_name(original_name);
        let ext = extension_for(content_type).or(original_ext).unwrap_or_else(|| "bin".to_string());
        format!("{}_docsafe.{}", stem, ext)
    });
    format!("attachment; filename=\"{}\"", name)
}

/// `filename=` parameter of a content-disposition, reduced to a bare name
fn disposition_file_name(value: &str) -> Option<String> {
    let raw = value.split(';').map(str::trim).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim().eq_ignore_ascii_case("filename").then_some(val)
    })?;
    let name = raw.trim().trim_matches('"');
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();

    let usable = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '"' || c.is_control());
    usable.then(|| name.to_string())
}

fn extension_for(content_type: &str) -> Option<String> {
    let ext = match media_type(content_type).as_str() {
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/pdf" => "pdf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        _ => return None,
    };
    Some(ext.to_string())
}

/// Sanitized stem plus extension of a client-supplied file name
fn split_file_name(name: &str) -> (String, Option<String>) {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.trim_matches('_').is_empty() { "document".to_string() } else { stem };

    let ext = ext
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    (stem, ext)
}
