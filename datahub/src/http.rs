//! HTTP transport abstraction.
//!
//! The dispatcher never talks to `reqwest` directly; it goes through the
//! `HttpClient` trait so the queue and client logic can be exercised against
//! a recording mock.

use crate::error::{DatahubError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// HTTP methods the hub API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Outbound request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// JSON-encoded text, sent as `application/json`
    Json(String),
    /// Opaque text (encrypted items), sent as `application/octet-stream`
    Raw(String),
}

impl RequestBody {
    pub fn content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::Raw(_) => "application/octet-stream",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RequestBody::Json(s) | RequestBody::Raw(s) => s,
        }
    }
}

/// A fully-built request to the hub.
#[derive(Debug, Clone)]
pub struct HubRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    /// Extra headers merged in from configuration
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for executing HTTP requests.
///
/// Implementations perform exactly one network call and never retry. A
/// non-2xx status is still an `Ok` here; the dispatcher decides what it means.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: &HubRequest) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production HTTP client using reqwest.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Wrap an already configured reqwest client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &HubRequest) -> Result<HttpResponse> {
        let mut req = self.client.request(request.method.into(), &request.url);

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, body.content_type())
                .body(body.as_str().to_owned());
            tracing::trace!(body_len = body.as_str().len(), "Added request body");
        }

        let response = req.send().await.map_err(|e| {
            tracing::debug!(error = %e, "HTTP request failed");
            e
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mock HTTP client for testing.
///
/// Responses are keyed by `"{METHOD} {path}"` and returned in FIFO order.
/// When a key has no queued response the default response is used, and if
/// there is none either the call fails.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response(
///     "POST /channel/orders",
///     Ok(HttpResponse { status: 201, body: "{}".to_string() }),
/// );
/// ```
#[derive(Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<Result<HttpResponse>>>>>,
    default_response: Arc<Mutex<Option<HttpResponse>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub body: Option<RequestBody>,
    pub headers: Vec<(String, String)>,
}

impl MockCall {
    /// Parse the recorded body as JSON. Panics on raw or missing bodies.
    pub fn json_body(&self) -> serde_json::Value {
        match &self.body {
            Some(RequestBody::Json(s)) => serde_json::from_str(s).expect("recorded body is JSON"),
            other => panic!("expected JSON body, got {:?}", other),
        }
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `"{METHOD} {path}"`.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(response);
    }

    /// Shorthand for a successful JSON response.
    pub fn add_json(&self, key: &str, status: u16, body: serde_json::Value) {
        self.add_response(
            key,
            Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    /// Response used when no keyed response is queued.
    pub fn set_default_response(&self, response: HttpResponse) {
        *self.default_response.lock() = Some(response);
    }

    /// Hold every call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Calls whose path equals `path`.
    pub fn calls_to(&self, path: &str) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &HubRequest) -> Result<HttpResponse> {
        let path = path_of(&request.url);
        self.calls.lock().push(MockCall {
            method: request.method,
            url: request.url.clone(),
            path: path.clone(),
            body: request.body.clone(),
            headers: request.headers.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = format!("{} {}", request.method, path);
        {
            let mut responses = self.responses.lock();
            if let Some(queue) = responses.get_mut(&key) {
                if !queue.is_empty() {
                    return queue.remove(0);
                }
            }
        }

        if let Some(response) = self.default_response.lock().clone() {
            return Ok(response);
        }

        Err(DatahubError::Other(anyhow::anyhow!(
            "No mock response configured for {}",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(method: Method, url: &str, body: Option<RequestBody>) -> HubRequest {
        HubRequest {
            method,
            url: url.to_string(),
            body,
            headers: vec![],
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_mock_client_fifo_responses() {
        let mock = MockHttpClient::new();
        mock.add_json("GET /channel/a", 200, serde_json::json!({"n": 1}));
        mock.add_json("GET /channel/a", 200, serde_json::json!({"n": 2}));

        let req = request(Method::Get, "http://hub/channel/a", None);
        let first = mock.execute(&req).await.unwrap();
        let second = mock.execute(&req).await.unwrap();

        assert_eq!(first.body, r#"{"n":1}"#);
        assert_eq!(second.body, r#"{"n":2}"#);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls_to("/channel/a").len(), 2);
    }

    #[tokio::test]
    async fn test_mock_client_no_response() {
        let mock = MockHttpClient::new();
        let req = request(Method::Delete, "http://hub/channel/x", None);
        assert!(mock.execute(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_client_default_response() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 201,
            body: String::new(),
        });
        let req = request(Method::Post, "http://hub/channel/x", None);
        assert_eq!(mock.execute(&req).await.unwrap().status, 201);
    }

    #[tokio::test]
    async fn test_reqwest_client_sends_json_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/orders"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"[1,2]"#))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new();
        let req = request(
            Method::Post,
            &format!("{}/channel/orders", mock_server.uri()),
            Some(RequestBody::Json("[1,2]".to_string())),
        );
        let response = client.execute(&req).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_client_passes_through_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new();
        let req = request(Method::Get, &format!("{}/channel/x", mock_server.uri()), None);
        let response = client.execute(&req).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, "nope");
    }

    #[tokio::test]
    async fn test_reqwest_client_sends_configured_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-team", "ops"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new();
        let mut req = request(Method::Get, &format!("{}/channel", mock_server.uri()), None);
        req.headers.push(("x-team".to_string(), "ops".to_string()));
        client.execute(&req).await.unwrap();
    }
}
