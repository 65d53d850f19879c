//! Inbound upload form
//! Reads the browser's multipart submission and rebuilds it for the upstream.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};

use crate::error::RelayError;
use crate::proxy::routes::{Endpoint, ProcessingMode};

const STRICT_PDF_FIELD: &str = "strictPdf";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Raw form content, file not yet required
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: Vec<(String, String)>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, RelayError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| upload_error("Failed to parse multipart data", e))?
        {
            let name = field.name().unwrap_or("").to_string();
            let file_name = field.file_name().map(|s| s.to_string());

            if file_name.is_some() || name == "file" || name == "files[]" {
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| upload_error("Failed to read uploaded file", e))?;

                if form.file.is_some() {
                    tracing::warn!("Ignoring extra file field '{}' ({} bytes)", name, bytes.len());
                    continue;
                }

                form.file = Some(UploadedFile {
                    file_name: file_name.unwrap_or_else(|| "document".to_string()),
                    content_type,
                    bytes,
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| upload_error(&format!("Failed to read field '{}'", name), e))?;
                form.fields.push((name, value));
            }
        }

        Ok(form)
    }
}

/// Body limit hits surface as 413; any other read failure is the client's malformed form
fn upload_error(context: &str, e: MultipartError) -> RelayError {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => RelayError::UploadRejected {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "Uploaded file is too large".to_string(),
        },
        _ => RelayError::BadRequest(format!("{}: {}", context, e.body_text())),
    }
}

/// A validated upload ready to be forwarded
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: UploadedFile,
    pub mode: ProcessingMode,
    pub lang: String,
    pub strict_pdf: String,
    fields: Vec<(String, String)>,
}

impl UploadRequest {
    /// Require the file and fill in the endpoint's defaults for missing options
    pub fn from_form(form: UploadForm, endpoint: Endpoint) -> Result<Self, RelayError> {
        let file = form
            .file
            .filter(|f| !f.bytes.is_empty())
            .ok_or_else(|| RelayError::BadRequest("Missing file".to_string()))?;

        let mode = ProcessingMode::parse(field(&form.fields, "mode"));
        let lang = field(&form.fields, "lang")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("auto")
            .to_string();
        let strict_pdf = field(&form.fields, STRICT_PDF_FIELD)
            .unwrap_or(endpoint.default_strict_pdf())
            .to_string();

        Ok(Self {
            file,
            mode,
            lang,
            strict_pdf,
            fields: form.fields,
        })
    }

    /// Text fields forwarded upstream, in submission order
    pub fn forwarded_fields(&self) -> Vec<(String, String)> {
        let mut fields = self.fields.clone();
        if !fields.iter().any(|(k, _)| k == STRICT_PDF_FIELD) {
            fields.push((STRICT_PDF_FIELD.to_string(), self.strict_pdf.clone()));
        }
        fields
    }

    /// Rebuild the multipart body. Called once per attempt since a `Form`
    /// is consumed by the request; the file bytes are shared, not copied.
    pub fn to_form(&self) -> Result<Form, reqwest::Error> {
        let body = reqwest::Body::from(self.file.bytes.clone());
        let mut part = Part::stream_with_length(body, self.file.bytes.len() as u64)
            .file_name(self.file.file_name.clone());

        if let Some(ct) = &self.file.content_type {
            part = part.mime_str(ct)?;
        }

        let mut form = Form::new().part("file", part);
        for (name, value) in self.forwarded_fields() {
            form = form.text(name, value);
        }
        Ok(form)
    }
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
