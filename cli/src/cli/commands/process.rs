use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use docsafe_core::config::load_config;
use reqwest::multipart::{Form, Part};

#[derive(Args)]
pub struct ProcessOptions {
    /// Document to clean (PDF, DOCX, PPTX)
    pub file: PathBuf,

    /// Processing mode: "correct" (cleanup) or "rephrase" (cleanup + rewrite)
    #[arg(short, long, default_value = "correct")]
    pub mode: String,

    /// Language hint
    #[arg(short, long, default_value = "auto")]
    pub lang: String,

    /// Strict PDF extraction
    #[arg(long)]
    pub strict_pdf: bool,

    /// Where to write the result (defaults to the name sent by the relay)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Relay base URL (defaults to the configured host and port)
    #[arg(long)]
    pub relay: Option<String>,
}

pub async fn run(config_path: Option<PathBuf>, options: ProcessOptions) -> anyhow::Result<()> {
    if !options.file.exists() {
        anyhow::bail!("File not found: {:?}", options.file);
    }

    let relay = match options.relay {
        Some(url) => url,
        None => {
            let config = load_config(config_path)?;
            let host = if config.server.allow_lan_access { "127.0.0.1".to_string() } else { config.server.host };
            format!("http://{}:{}", host, config.server.port)
        }
    };

    let bytes = std::fs::read(&options.file)
        .with_context(|| format!("Failed to read {:?}", options.file))?;
    let file_name = options
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();

    println!("Uploading {} ({} bytes, mode {})...", file_name, bytes.len(), options.mode);

    let part = Part::bytes(bytes)
        .file_name(file_name.clone())
        .mime_str(mime_for(&options.file))?;
    let form = Form::new()
        .part("file", part)
        .text("mode", options.mode)
        .text("lang", options.lang)
        .text("strictPdf", options.strict_pdf.to_string());

    let resp = reqwest::Client::new()
        .post(format!("{}/api/docsafe", relay.trim_end_matches('/')))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Relay not reachable at {}", relay))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(|s| s.to_string()))
            .unwrap_or(body);
        anyhow::bail!("Processing failed ({}): {}", status, message);
    }

    let suggested = resp
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition);
    let remaining = resp
        .headers()
        .get("x-docsafe-free-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = resp.bytes().await?;
    let output = options.output.unwrap_or_else(|| {
        let name = suggested.unwrap_or_else(|| format!("{}_docsafe.zip", file_name));
        options
            .file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(name)
    });

    std::fs::write(&output, &body).with_context(|| format!("Failed to write {:?}", output))?;

    println!("Saved {} bytes to {:?}", body.len(), output);
    if let Some(remaining) = remaining {
        println!("Free uploads remaining: {}", remaining);
    }

    Ok(())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Some("doc") => "application/msword",
        Some("ppt") => "application/vnd.ms-powerpoint",
        _ => "application/octet-stream",
    }
}

/// Extract a bare file name from a content-disposition value
fn filename_from_disposition(value: &str) -> Option<String> {
    let raw = value
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))?;
    let name = raw.trim_matches('"');
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
