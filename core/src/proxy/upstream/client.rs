//! Upstream client for calling the document-processing backend

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Response,
};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::{UpstreamConfig, UpstreamTarget};
use crate::error::RelayError;
use crate::proxy::config::RelayPolicy;
use crate::proxy::upload::UploadRequest;

const USER_AGENT: &str = concat!("docsafe-relay/", env!("CARGO_PKG_VERSION"));

/// Upstream response plus the attempt that produced it
pub struct UpstreamReply {
    pub response: Response,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            Duration::from_secs(config.connect_timeout),
            Duration::from_secs(config.request_timeout),
        )
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http_client })
    }

    pub fn build_url(base_url: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth_headers(target: &UpstreamTarget) -> Result<HeaderMap, RelayError> {
        let mut headers = HeaderMap::new();
        if let Some((name, key)) = &target.api_key {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RelayError::Misconfigured(format!("Invalid API key header name: {}", e)))?;
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| RelayError::Misconfigured(format!("Invalid API key value: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// POST the document with sequential retries on transport failures.
    ///
    /// Any HTTP response, whatever its status, ends the loop: only a request
    /// that never got an answer is worth repeating.
    pub async fn post_document(
        &self,
        url: &str,
        target: &UpstreamTarget,
        request: &UploadRequest,
        policy: &RelayPolicy,
    ) -> Result<UpstreamReply, RelayError> {
        let headers = Self::auth_headers(target)?;
        let max_attempts = policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let form = request
                .to_form()
                .map_err(|e| RelayError::BadRequest(format!("Invalid file content type: {}", e)))?;

            let result = self
                .http_client
                .post(url)
                .headers(headers.clone())
                .multipart(form)
                .send()
                .await;

            match result {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!("Upstream answered on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(UpstreamReply { response, attempts: attempt });
                }
                Err(e) if e.is_builder() => {
                    return Err(RelayError::Misconfigured(format!(
                        "Invalid upstream URL {}: {}",
                        url, e
                    )));
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            "Upstream request failed on final attempt {}/{}: {}",
                            attempt, max_attempts, e
                        );
                        return Err(RelayError::Unreachable {
                            attempts: attempt,
                            timed_out: e.is_timeout(),
                            source: e,
                        });
                    }

                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        "Upstream request failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fire a best-effort GET to wake an on-demand backend.
    /// The outcome is only logged.
    pub fn spawn_warmup(&self, url: String, timeout: Duration) -> JoinHandle<()> {
        let client = self.http_client.clone();
        tokio::spawn(async move {
            match client.get(&url).timeout(timeout).send().await {
                Ok(resp) => tracing::debug!("Warm-up ping {} -> {}", url, resp.status()),
                Err(e) => tracing::debug!("Warm-up ping {} failed: {}", url, e),
            }
        })
    }
}
