//! # Retrying Transport
//!
//! HTTP calls with a bounded, flat retry schedule.
//!
//! ## Outcome Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Response Classification                              │
//! │                                                                         │
//! │  attempt ──► HttpClient::send(request.clone())                          │
//! │                 │                                                       │
//! │      ┌──────────┼──────────────┬───────────────┬────────────────┐       │
//! │      ▼          ▼              ▼               ▼                ▼       │
//! │  transport     2xx            401             5xx          other 4xx    │
//! │  failure        │              │               │                │       │
//! │      │          ▼              ▼               │                ▼       │
//! │      │       Ok(body)    Unauthorized          │       ServerError      │
//! │      │                   (terminal)            │       (terminal)       │
//! │      ▼                                         ▼                        │
//! │  retry after 1s                         retry after 2s                  │
//! │  exhausted ⇒ NetworkError               exhausted ⇒ ServerError         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `max_attempts` counts every attempt including the first; 0 behaves like 1.
//! Each attempt sends a clone of the same [`RequestSpec`], so retries carry
//! identical bytes. Delays are flat: no growth, no jitter.

use async_trait::async_trait;
use backoff::backoff::Stop;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Delay before retrying after a transport failure.
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay before retrying after a 5xx response.
pub const SERVER_RETRY_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// Request / Response
// =============================================================================

/// HTTP method subset used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully-built request. Cloned once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RequestSpec {
    /// A POST with a JSON body.
    pub fn post_json<T: serde::Serialize + ?Sized>(url: &str, payload: &T) -> SyncResult<Self> {
        Ok(RequestSpec {
            method: Method::Post,
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::to_vec(payload)?),
        })
    }

    /// A bodiless GET.
    pub fn get(url: &str) -> Self {
        RequestSpec {
            method: Method::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

/// A received response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// =============================================================================
// HTTP Client Seam
// =============================================================================

/// One HTTP exchange. `Err` means no response was received at all.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: RequestSpec) -> SyncResult<HttpResponse>;
}

/// `reqwest`-backed client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ReqwestClient {
    /// Builds a client with a per-request timeout.
    pub fn new(timeout: Duration, api_key: Option<String>) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon-sdk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfiguration(format!("http client: {}", e)))?;

        Ok(ReqwestClient { client, api_key })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: RequestSpec) -> SyncResult<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).body(request.body),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref key) = self.api_key {
            builder = builder.header("X-Api-Key", key.as_str());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// =============================================================================
// Retrying Transport
// =============================================================================

/// Executes requests through an [`HttpClient`] with flat retries.
#[derive(Clone)]
pub struct RetryingTransport {
    client: Arc<dyn HttpClient>,
}

impl RetryingTransport {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        RetryingTransport { client }
    }

    /// Sends `request` once without retrying and returns the raw response.
    pub async fn send_once(&self, request: RequestSpec) -> SyncResult<HttpResponse> {
        self.client.send(request).await
    }

    /// Sends `request`, retrying transport failures and 5xx responses until
    /// `max_attempts` attempts have been made. Returns the 2xx body.
    pub async fn execute(&self, request: &RequestSpec, max_attempts: u32) -> SyncResult<Bytes> {
        let max_attempts = max_attempts.max(1);
        let attempts = AtomicU32::new(0);

        let client = &self.client;
        let attempts_ref = &attempts;

        let operation = move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(url = %request.url, attempt, max_attempts, "Sending request");

            let err = match classify(client.send(request.clone()).await) {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            match retry_delay(&err) {
                Some(delay) if attempt < max_attempts => {
                    Err(backoff::Error::retry_after(err, delay))
                }
                _ => Err(backoff::Error::permanent(err)),
            }
        };

        let notify = |err: SyncError, delay: Duration| {
            warn!(
                url = %request.url,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Request failed, retrying"
            );
        };

        let result = backoff::future::retry_notify(Stop {}, operation, notify).await;

        if let Err(ref err) = result {
            debug!(
                url = %request.url,
                attempts = attempts.load(Ordering::SeqCst),
                error = %err,
                "Request gave up"
            );
        }

        result
    }
}

/// Maps a raw exchange to the transport contract.
fn classify(result: SyncResult<HttpResponse>) -> SyncResult<Bytes> {
    let response = result?;

    match response.status {
        200..=299 => Ok(response.body),
        401 => Err(SyncError::Unauthorized),
        code => Err(SyncError::ServerError {
            code,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }),
    }
}

/// Flat delay for retryable failures, `None` for terminal ones.
fn retry_delay(err: &SyncError) -> Option<Duration> {
    match err {
        SyncError::NetworkError(_) => Some(NETWORK_RETRY_DELAY),
        SyncError::ServerError { code, .. } if *code >= 500 => Some(SERVER_RETRY_DELAY),
        _ => None,
    }
}

// =============================================================================
// Test Client
// =============================================================================


#[cfg(test)]
mod tests {
    use super::fake::{Reply, ScriptedClient};
    use super::*;

    fn transport(client: &Arc<ScriptedClient>) -> RetryingTransport {
        RetryingTransport::new(client.clone())
    }

    fn assert_elapsed(started: tokio::time::Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(100),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    fn request() -> RequestSpec {
        RequestSpec::post_json("https://api.example.com/sync", &serde_json::json!({"a": 1})).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_then_success() {
        let client = Arc::new(ScriptedClient::new());
        client.push(Reply::status(500));
        client.push(Reply::status(503));
        client.push(Reply::json("{\"ok\":true}"));

        let started = tokio::time::Instant::now();
        let body = transport(&client).execute(&request(), 3).await.unwrap();

        assert_eq!(&body[..], b"{\"ok\":true}");
        assert_eq!(client.calls(), 3);
        assert_elapsed(started, SERVER_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_never_retried() {
        let client = Arc::new(ScriptedClient::new());
        client.push(Reply::status(401));

        let err = transport(&client).execute(&request(), 5).await.unwrap_err();

        assert_eq!(err, SyncError::Unauthorized);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_terminal() {
        let client = Arc::new(ScriptedClient::new());
        client.push(Reply::Respond(HttpResponse::new(422, "bad payload")));

        let err = transport(&client).execute(&request(), 5).await.unwrap_err();

        assert_eq!(
            err,
            SyncError::ServerError {
                code: 422,
                body: "bad payload".into()
            }
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_exhaust_budget() {
        let client = Arc::new(ScriptedClient::with_fallback(Reply::NetworkFailure));

        let started = tokio::time::Instant::now();
        let err = transport(&client).execute(&request(), 3).await.unwrap_err();

        assert!(matches!(err, SyncError::NetworkError(_)));
        assert_eq!(client.calls(), 3);
        assert_elapsed(started, NETWORK_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_5xx_reports_last_status() {
        let client = Arc::new(ScriptedClient::with_fallback(Reply::status(502)));

        let err = transport(&client).execute(&request(), 2).await.unwrap_err();

        assert!(matches!(err, SyncError::ServerError { code: 502, .. }));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_means_one() {
        let client = Arc::new(ScriptedClient::with_fallback(Reply::status(500)));

        let _ = transport(&client).execute(&request(), 0).await;

        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_send_identical_bytes() {
        let client = Arc::new(ScriptedClient::new());
        client.push(Reply::NetworkFailure);
        client.push(Reply::status(500));

        transport(&client).execute(&request(), 3).await.unwrap();

        let sent = client.requests();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| *r == sent[0]));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200, Bytes::new()).with_header("Content-Type", "image/png");
        assert_eq!(response.header("content-type"), Some("image/png"));
        assert!(response.is_success());
    }
}
