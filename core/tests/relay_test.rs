use std::time::{Duration, Instant};

use docsafe_core::config::Config;
use docsafe_core::proxy::{build_router, AppState, UpstreamClient};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use wiremock::matchers::{any, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZIP: &str = "application/zip";

fn test_config(base_url: Option<String>) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = base_url;
    config.relay.warmup_enabled = false;
    config.relay.backoff_base_ms = 50;
    config.relay.max_attempts = 3;
    config
}

async fn spawn_relay_with(config: Config, client: UpstreamClient) -> String {
    let max_upload = config.server.max_upload_bytes();
    let app = build_router(AppState::with_client(&config, client), max_upload);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_relay(config: Config) -> String {
    let client = UpstreamClient::with_timeouts(Duration::from_secs(2), Duration::from_secs(10)).unwrap();
    spawn_relay_with(config, client).await
}

/// Relay whose upstream requests give up after 300ms
async fn spawn_impatient_relay(config: Config) -> String {
    let client = UpstreamClient::with_timeouts(Duration::from_secs(1), Duration::from_millis(300)).unwrap();
    spawn_relay_with(config, client).await
}

fn upload_form(fields: &[(&str, &str)]) -> Form {
    let part = Part::bytes(b"%PDF-1.7 quarterly figures".to_vec())
        .file_name("report.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let mut form = Form::new().part("file", part);
    for (k, v) in fields {
        form = form.text(k.to_string(), v.to_string());
    }
    form
}

fn archive(len: usize) -> Vec<u8> {
    let mut body = b"PK\x03\x04".to_vec();
    body.extend((0..len - 4).map(|i| (i % 251) as u8));
    body
}

async fn post(relay: &str, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/docsafe", relay))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn error_message(resp: reqwest::Response) -> String {
    let value: serde_json::Value = resp.json().await.unwrap();
    value["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_missing_file_returns_400_without_upstream_call() {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut config = test_config(Some(upstream.uri()));
    config.relay.warmup_enabled = true;
    let relay = spawn_relay(config).await;

    let form = Form::new().text("mode", "correct").text("lang", "auto");
    let resp = post(&relay, form).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(resp).await, "Missing file");
}

#[tokio::test]
async fn test_missing_upstream_url_returns_500() {
    let relay = spawn_relay(test_config(None)).await;

    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(resp).await.contains("Upstream URL not configured"));
}

#[tokio::test]
async fn test_non_multipart_body_is_a_client_error() {
    let relay = spawn_relay(test_config(Some("http://127.0.0.1:9".into()))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/docsafe", relay))
        .body("not a form")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!error_message(resp).await.is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_payload_too_large() {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut config = test_config(Some(upstream.uri()));
    config.server.max_upload_mb = 1;
    let relay = spawn_relay(config).await;

    let part = Part::bytes(vec![b'x'; 3 * 1024 * 1024])
        .file_name("huge.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let resp = post(&relay, Form::new().part("file", part)).await;

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(error_message(resp).await.contains("too large"));
}

#[tokio::test]
async fn test_upstream_error_status_and_body_are_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(500).set_body_string("worker crashed while parsing"))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.headers().get("set-cookie").is_none());
    assert!(resp.text().await.unwrap().contains("worker crashed while parsing"));
}

#[tokio::test]
async fn test_upstream_json_error_is_forwarded_as_json() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(
            ResponseTemplate::new(413).set_body_json(serde_json::json!({"detail": "file too large"})),
        )
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let value: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(value["detail"], "file too large");
}

#[tokio::test]
async fn test_html_success_is_not_forwarded_as_download() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Service waking up</body></html>".repeat(100), "text/html"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(resp.headers().get("content-disposition").is_none());
    assert!(error_message(resp).await.contains("text/html"));
}

#[tokio::test]
async fn test_undersized_archive_is_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(100), ZIP))
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(error_message(resp).await.contains("undersized payload (100 bytes"));
}

#[tokio::test]
async fn test_valid_archive_is_passed_through_unchanged() {
    let upstream = MockServer::start().await;
    let payload = archive(8 * 1024);
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(payload.clone(), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[("mode", "correct")])).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(headers["content-type"], ZIP);
    assert_eq!(headers["cache-control"], "no-store");
    assert_eq!(headers["x-docsafe-attempts"], "1");
    assert_eq!(headers["x-docsafe-free-remaining"], "2");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"report_docsafe.zip\""
    );
    assert!(headers["set-cookie"]
        .to_str()
        .unwrap()
        .starts_with("docsafe_free_used=1;"));

    let body = resp.bytes().await.unwrap();
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn test_upstream_disposition_is_preserved() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(archive(4096), "application/octet-stream")
                .insert_header("content-disposition", "attachment; filename=\"cleaned_files.zip\""),
        )
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"cleaned_files.zip\""
    );
}

#[tokio::test]
async fn test_inline_upstream_disposition_is_served_as_attachment() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(archive(4096), ZIP)
                .insert_header("content-disposition", "inline; filename=\"result.zip\""),
        )
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"result.zip\""
    );
}

#[tokio::test]
async fn test_rephrase_mode_routes_and_forwards_options() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean-v2"))
        .and(header("x-api-key", "secret-key"))
        .and(body_string_contains("name=\"lang\""))
        .and(body_string_contains("name=\"strictPdf\""))
        .and(body_string_contains("%PDF-1.7 quarterly figures"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config(Some(upstream.uri()));
    config.upstream.api_key = Some("secret-key".into());
    let relay = spawn_relay(config).await;

    let resp = post(&relay, upload_form(&[("mode", "rephrase"), ("lang", "fr"), ("strictPdf", "true")])).await;

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_legacy_process_endpoint_uses_same_pipeline() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean-v2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/process", relay))
        .multipart(upload_form(&[("mode", "v2")]))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_strict_pdf_default_depends_on_endpoint() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .and(body_string_contains("name=\"strictPdf\"\r\n\r\ntrue"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .and(body_string_contains("name=\"strictPdf\"\r\n\r\nfalse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;

    let legacy = reqwest::Client::new()
        .post(format!("{}/api/process", relay))
        .multipart(upload_form(&[]))
        .send()
        .await
        .unwrap();
    assert_eq!(legacy.status(), StatusCode::OK);

    let current = post(&relay, upload_form(&[])).await;
    assert_eq!(current.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_transient_failures_are_retried_with_backoff() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .up_to_n_times(2)
        .expect(2)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(1)
        .mount(&upstream)
        .await;

    let relay = spawn_impatient_relay(test_config(Some(upstream.uri()))).await;

    let started = Instant::now();
    let resp = post(&relay, upload_form(&[])).await;
    let elapsed = started.elapsed();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-docsafe-attempts"], "3");
    // two timeouts plus backoff of 50ms then 100ms
    assert!(elapsed >= Duration::from_millis(600 + 150), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_gives_up_after_exactly_max_attempts() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&upstream)
        .await;

    let relay = spawn_impatient_relay(test_config(Some(upstream.uri()))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let message = error_message(resp).await;
    assert!(message.contains("3 attempt(s)"));
    assert!(message.contains("cold-starting"));

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_bad_gateway() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let relay = spawn_relay(test_config(Some(format!("http://127.0.0.1:{}", port)))).await;
    let resp = post(&relay, upload_form(&[])).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(error_message(resp).await.contains("after 3 attempt(s)"));
}

#[tokio::test]
async fn test_exhausted_quota_is_refused_before_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/docsafe", relay))
        .header("cookie", "docsafe_free_used=3")
        .multipart(upload_form(&[]))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(error_message(resp).await.contains("3/3"));
}

#[tokio::test]
async fn test_quota_endpoint_reports_cookie_usage() {
    let relay = spawn_relay(test_config(None)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/quota", relay))
        .header("cookie", "docsafe_free_used=1")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let value: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(value["used"], 1);
    assert_eq!(value["limit"], 3);
    assert_eq!(value["remaining"], 2);
    assert_eq!(value["enabled"], true);
}

#[tokio::test]
async fn test_identical_requests_get_equivalent_responses() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .expect(2)
        .mount(&upstream)
        .await;

    let relay = spawn_relay(test_config(Some(upstream.uri()))).await;

    let first = post(&relay, upload_form(&[("mode", "correct")])).await;
    let second = post(&relay, upload_form(&[("mode", "correct")])).await;

    assert_eq!(first.status(), second.status());
    let mut first_names: Vec<String> = first.headers().keys().map(|k| k.to_string()).collect();
    let mut second_names: Vec<String> = second.headers().keys().map(|k| k.to_string()).collect();
    first_names.sort();
    second_names.sort();
    assert_eq!(first_names, second_names);
    assert_eq!(first.headers()["content-disposition"], second.headers()["content-disposition"]);
    assert_eq!(first.bytes().await.unwrap(), second.bytes().await.unwrap());
}

#[tokio::test]
async fn test_warmup_ping_hits_health_endpoint() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .mount(&upstream)
        .await;

    let mut config = test_config(Some(upstream.uri()));
    config.relay.warmup_enabled = true;
    let relay = spawn_relay(config).await;

    let resp = post(&relay, upload_form(&[])).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // The ping is detached and may land after the response
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let pings = upstream
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/health")
            .count();
        if pings >= 1 || Instant::now() > deadline {
            assert_eq!(pings, 1, "expected exactly one warm-up ping");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_failed_warmup_does_not_affect_relay() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/clean"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(archive(4096), ZIP))
        .mount(&upstream)
        .await;

    let mut config = test_config(Some(upstream.uri()));
    config.relay.warmup_enabled = true;
    let relay = spawn_relay(config).await;

    let resp = post(&relay, upload_form(&[])).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
