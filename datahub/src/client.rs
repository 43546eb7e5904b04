//! The `Datahub` client handle.
//!
//! Each method maps to one hub endpoint and returns the decoded response body.
//! Arguments are validated before anything is sent: a validation failure is
//! an [`DatahubError::InvalidRequest`] and the transport is never called.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::DatahubConfig;
use crate::crypto::{AesGcmCipher, Cipher};
use crate::dispatch::{Dispatcher, HubResponse, RequestKind};
use crate::error::{DatahubError, Result};
use crate::http::{HttpClient, Method, ReqwestHttpClient};
use crate::models::{
    ChannelAlert, ChannelConfig, ChannelUpdate, GroupAlert, GroupCallbackConfig,
    GroupCallbackData, GroupCallbackUpdate,
};
use crate::queue::{ContentQueue, FlushCallback, FlushReport, QueueState};

/// Client for one hub. Cheap to clone; clones share the write queue.
#[derive(Clone)]
pub struct Datahub {
    base_url: String,
    dispatcher: Dispatcher,
    queue: ContentQueue,
}

/// Builder for [`Datahub`] with pluggable transport and cipher.
pub struct DatahubBuilder {
    config: DatahubConfig,
    http: Option<Arc<dyn HttpClient>>,
    cipher: Option<Arc<dyn Cipher>>,
    on_queue_finished: Option<FlushCallback>,
}

impl DatahubBuilder {
    pub fn new(config: DatahubConfig) -> Self {
        Self {
            config,
            http: None,
            cipher: None,
            on_queue_finished: None,
        }
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Called with the report of every queue flush that sent something.
    pub fn on_queue_finished<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FlushReport) + Send + Sync + 'static,
    {
        self.on_queue_finished = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Datahub> {
        self.config.validate()?;

        let base_url = self.config.base_url();
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let cipher = self.cipher.unwrap_or_else(|| Arc::new(AesGcmCipher));
        let dispatcher = Dispatcher::new(&self.config, http, cipher);
        let queue = ContentQueue::new(
            &self.config.queue,
            base_url.clone(),
            dispatcher.clone(),
            self.on_queue_finished,
        );

        tracing::debug!(url = %base_url, encrypted = dispatcher.encrypts(), "Datahub client ready");

        Ok(Datahub {
            base_url,
            dispatcher,
            queue,
        })
    }
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DatahubError::missing(what));
    }
    Ok(())
}

/// `/latest` or `/latest/{n}`; `None` and `Some(0)` both mean a single item.
fn with_count(path: String, n: Option<u32>) -> String {
    match n {
        Some(n) if n > 0 => format!("{}/{}", path, n),
        _ => path,
    }
}

impl Datahub {
    /// Client with the default `reqwest` transport and AES-GCM cipher.
    pub fn new(config: DatahubConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: DatahubConfig) -> DatahubBuilder {
        DatahubBuilder::new(config)
    }

    /// Sanitized base URL every request is built on.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    fn channel_url(&self, name: &str) -> String {
        format!("{}/channel/{}", self.base_url, name)
    }

    fn webhook_url(&self, name: &str) -> String {
        format!("{}/webhook/{}", self.base_url, name)
    }

    fn alert_url(&self, name: &str) -> String {
        format!("{}/alert/{}", self.base_url, name)
    }

    async fn get(&self, url: &str, kind: RequestKind) -> Result<Value> {
        Ok(self.dispatcher.dispatch(url, Method::Get, None, kind).await?.body)
    }

    async fn send_json<T: Serialize>(&self, url: &str, method: Method, body: &T) -> Result<Value> {
        let body = serde_json::to_value(body)?;
        Ok(self
            .dispatcher
            .dispatch(url, method, Some(&body), RequestKind::PlainJson)
            .await?
            .body)
    }

    /// Send an arbitrary request through the dispatcher and get the full response.
    pub async fn request(
        &self,
        url: &str,
        method: Method,
        payload: Option<&Value>,
        kind: RequestKind,
    ) -> Result<HubResponse> {
        self.dispatcher.dispatch(url, method, payload, kind).await
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, config: &ChannelConfig) -> Result<Value> {
        config.validate()?;
        let url = format!("{}/channel", self.base_url);
        self.send_json(&url, Method::Post, config).await
    }

    pub async fn update_channel(&self, name: &str, update: &ChannelUpdate) -> Result<Value> {
        require(name, "channel name")?;
        self.send_json(&self.channel_url(name), Method::Put, update).await
    }

    pub async fn get_channels(&self) -> Result<Value> {
        let url = format!("{}/channel", self.base_url);
        self.get(&url, RequestKind::PlainJson).await
    }

    pub async fn get_channel(&self, name: &str) -> Result<Value> {
        require(name, "channel name")?;
        self.get(&self.channel_url(name), RequestKind::PlainJson).await
    }

    pub async fn delete_channel(&self, name: &str) -> Result<Value> {
        require(name, "channel name")?;
        Ok(self
            .dispatcher
            .dispatch(&self.channel_url(name), Method::Delete, None, RequestKind::PlainJson)
            .await?
            .body)
    }

    pub async fn get_channel_status(&self, name: &str) -> Result<Value> {
        require(name, "channel name")?;
        let url = format!("{}/status", self.channel_url(name));
        self.get(&url, RequestKind::PlainJson).await
    }

    pub async fn get_time(&self, name: &str) -> Result<Value> {
        require(name, "channel name")?;
        let url = format!("{}/time", self.channel_url(name));
        self.get(&url, RequestKind::PlainJson).await
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Write one item to a channel right away.
    ///
    /// With an encryption password configured `content` must be a JSON
    /// string; it is encrypted and sent as an opaque body.
    pub async fn add_content(&self, name: &str, content: &Value) -> Result<Value> {
        require(name, "channel name")?;
        if crate::queue::is_blank(content) {
            return Err(DatahubError::missing("content"));
        }
        Ok(self
            .dispatcher
            .dispatch(
                &self.channel_url(name),
                Method::Post,
                Some(content),
                RequestKind::EncryptedItem,
            )
            .await?
            .body)
    }

    pub async fn get_content(&self, name: &str, id: &str) -> Result<Value> {
        require(name, "channel name")?;
        require(id, "content id")?;
        let url = format!("{}/{}", self.channel_url(name), id);
        self.get(&url, RequestKind::EncryptedItem).await
    }

    /// The latest item, or the latest `n` items.
    pub async fn get_latest(&self, name: &str, n: Option<u32>) -> Result<Value> {
        require(name, "channel name")?;
        let url = with_count(format!("{}/latest", self.channel_url(name)), n);
        self.get(&url, RequestKind::EncryptedItem).await
    }

    /// The earliest item, or the earliest `n` items.
    pub async fn get_earliest(&self, name: &str, n: Option<u32>) -> Result<Value> {
        require(name, "channel name")?;
        let url = with_count(format!("{}/earliest", self.channel_url(name)), n);
        self.get(&url, RequestKind::EncryptedItem).await
    }

    // ------------------------------------------------------------------
    // Group callbacks
    // ------------------------------------------------------------------

    pub async fn create_group_callback(&self, config: &GroupCallbackConfig) -> Result<Value> {
        config.validate()?;
        let body = config.to_body(self.channel_url(&config.channel_name));
        self.send_json(&self.webhook_url(&config.name), Method::Put, &body)
            .await
    }

    pub async fn update_group_callback(
        &self,
        name: &str,
        update: &GroupCallbackUpdate,
    ) -> Result<Value> {
        require(name, "group name")?;
        self.send_json(&self.webhook_url(name), Method::Put, update).await
    }

    pub async fn get_group_callbacks(&self) -> Result<Value> {
        let url = format!("{}/webhook", self.base_url);
        self.get(&url, RequestKind::PlainJson).await
    }

    pub async fn get_group_callback(&self, name: &str) -> Result<Value> {
        require(name, "group name")?;
        self.get(&self.webhook_url(name), RequestKind::PlainJson).await
    }

    pub async fn delete_group_callback(&self, name: &str) -> Result<Value> {
        require(name, "group name")?;
        Ok(self
            .dispatcher
            .dispatch(&self.webhook_url(name), Method::Delete, None, RequestKind::PlainJson)
            .await?
            .body)
    }

    /// Fetch the item behind the first URI of a group callback delivery.
    pub async fn get_group_callback_content(&self, data: &GroupCallbackData) -> Result<Value> {
        let uri = data
            .uris
            .first()
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| DatahubError::missing("data"))?;
        self.get(uri, RequestKind::EncryptedItem).await
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Create or update a channel alert.
    pub async fn channel_alert(&self, name: &str, alert: &ChannelAlert) -> Result<Value> {
        require(name, "alert name")?;
        let body = alert.to_body()?;
        self.send_json(&self.alert_url(name), Method::Put, &body).await
    }

    /// Create or update a group alert.
    pub async fn group_alert(&self, name: &str, alert: &GroupAlert) -> Result<Value> {
        require(name, "alert name")?;
        let body = alert.to_body()?;
        self.send_json(&self.alert_url(name), Method::Put, &body).await
    }

    pub async fn alert_status(&self, name: &str) -> Result<Value> {
        require(name, "alert name")?;
        self.get(&self.alert_url(name), RequestKind::PlainJson).await
    }

    // ------------------------------------------------------------------
    // Write queue
    // ------------------------------------------------------------------

    /// Queue an item for a batched write. See [`ContentQueue::add`].
    pub fn add_content_to_queue(&self, name: &str, content: Value) -> Result<()> {
        self.queue.add(name, content)
    }

    pub fn start_queue(&self) -> Result<()> {
        self.queue.start()
    }

    pub fn stop_queue(&self) {
        self.queue.stop()
    }

    pub fn finish_queue(&self) {
        self.queue.finish()
    }

    /// Flush the queue now and wait for every channel send to settle.
    pub async fn send_queue(&self) -> FlushReport {
        self.queue.flush().await
    }

    pub fn queue_enabled(&self) -> bool {
        self.queue.is_enabled()
    }

    pub fn set_queue_enabled(&self, enabled: bool) -> Result<()> {
        self.queue.set_enabled(enabled)
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn queue(&self) -> &ContentQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockHttpClient, RequestBody};
    use crate::models::{AlertOperator, BatchMode, StorageMode};
    use parking_lot::Mutex;
    use serde_json::json;

    fn client(mock: &MockHttpClient) -> Datahub {
        Datahub::builder(DatahubConfig::new("HUB.example.com/"))
            .http_client(Arc::new(mock.clone()))
            .build()
            .unwrap()
    }

    fn encrypted_client(mock: &MockHttpClient) -> Datahub {
        let mut config = DatahubConfig::new("http://hub");
        config.encryption_password = Some("s3cret".to_string());
        Datahub::builder(config)
            .http_client(Arc::new(mock.clone()))
            .build()
            .unwrap()
    }

    fn is_invalid(result: Result<Value>, message: &str) -> bool {
        matches!(result, Err(DatahubError::InvalidRequest(m)) if m == message)
    }

    #[test]
    fn test_build_requires_url() {
        let err = Datahub::new(DatahubConfig::default()).err().unwrap();
        assert!(matches!(err, DatahubError::Config(_)));
        assert!(err.to_string().contains("Missing datahub URL"));
    }

    #[test]
    fn test_url_is_sanitized() {
        let mock = MockHttpClient::new();
        assert_eq!(client(&mock).url(), "http://hub.example.com");
    }

    #[tokio::test]
    async fn test_validation_never_reaches_transport() {
        let mock = MockHttpClient::new();
        let hub = client(&mock);

        assert!(is_invalid(
            hub.create_channel(&ChannelConfig::new("", "ops")).await,
            "Missing channel name"
        ));
        assert!(is_invalid(
            hub.create_channel(&ChannelConfig::new("orders", "")).await,
            "Missing channel owner"
        ));
        assert!(is_invalid(hub.get_channel("").await, "Missing channel name"));
        assert!(is_invalid(hub.delete_channel("").await, "Missing channel name"));
        assert!(is_invalid(hub.add_content("a", &Value::Null).await, "Missing content"));
        assert!(is_invalid(hub.add_content("a", &json!("")).await, "Missing content"));
        assert!(is_invalid(hub.get_content("a", "").await, "Missing content id"));
        assert!(is_invalid(hub.get_latest("", Some(2)).await, "Missing channel name"));
        assert!(is_invalid(hub.get_group_callback("").await, "Missing group name"));
        assert!(is_invalid(
            hub.create_group_callback(&GroupCallbackConfig::new("g", "orders", "")).await,
            "Missing callback URL"
        ));
        assert!(is_invalid(
            hub.get_group_callback_content(&GroupCallbackData::default()).await,
            "Missing data"
        ));
        assert!(is_invalid(hub.alert_status("").await, "Missing alert name"));
        assert!(hub.add_content_to_queue("", json!(1)).is_err());

        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_endpoints() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 200,
            body: "{}".to_string(),
        });
        let hub = client(&mock);

        let config = ChannelConfig {
            storage: Some(StorageMode::Single),
            ..ChannelConfig::new("orders", "ops")
        };
        hub.create_channel(&config).await.unwrap();
        hub.update_channel(
            "orders",
            &ChannelUpdate {
                ttl_days: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        hub.get_channels().await.unwrap();
        hub.get_channel_status("orders").await.unwrap();
        hub.get_time("orders").await.unwrap();
        hub.delete_channel("orders").await.unwrap();

        let calls = mock.get_calls();
        let seen: Vec<String> = calls
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect();
        assert_eq!(
            seen,
            vec![
                "POST /channel",
                "PUT /channel/orders",
                "GET /channel",
                "GET /channel/orders/status",
                "GET /channel/orders/time",
                "DELETE /channel/orders",
            ]
        );
        assert_eq!(
            calls[0].json_body(),
            json!({"name": "orders", "owner": "ops", "storage": "SINGLE"})
        );
        assert_eq!(calls[1].json_body(), json!({"ttlDays": 7}));
        assert!(calls[5].body.is_none());
    }

    #[tokio::test]
    async fn test_latest_and_earliest_paths() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 200,
            body: "[]".to_string(),
        });
        let hub = client(&mock);

        hub.get_latest("a", None).await.unwrap();
        hub.get_latest("a", Some(5)).await.unwrap();
        hub.get_earliest("a", Some(0)).await.unwrap();
        hub.get_earliest("a", Some(3)).await.unwrap();

        let paths: Vec<String> = mock.get_calls().into_iter().map(|c| c.path).collect();
        assert_eq!(
            paths,
            vec![
                "/channel/a/latest",
                "/channel/a/latest/5",
                "/channel/a/earliest",
                "/channel/a/earliest/3",
            ]
        );
    }

    #[tokio::test]
    async fn test_add_content_posts_json() {
        let mock = MockHttpClient::new();
        mock.add_json("POST /channel/orders", 201, json!({"_links": {"self": {"href": "x"}}}));
        let hub = client(&mock);

        let response = hub.add_content("orders", &json!({"id": 7})).await.unwrap();

        assert_eq!(response["_links"]["self"]["href"], json!("x"));
        assert_eq!(mock.calls_to("/channel/orders")[0].json_body(), json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_encrypted_content_round_trip() {
        let mock = MockHttpClient::new();
        mock.add_json("POST /channel/secure", 201, json!({}));
        let hub = encrypted_client(&mock);

        hub.add_content("secure", &json!("{\"card\":\"4111\"}")).await.unwrap();

        let sealed = match &mock.calls_to("/channel/secure")[0].body {
            Some(RequestBody::Raw(sealed)) => sealed.clone(),
            other => panic!("expected raw body, got {:?}", other),
        };
        assert!(!sealed.contains("4111"));

        mock.add_response(
            "GET /channel/secure/2024/01/01/abc",
            Ok(HttpResponse {
                status: 200,
                body: sealed,
            }),
        );
        let content = hub.get_content("secure", "2024/01/01/abc").await.unwrap();
        assert_eq!(content, json!("{\"card\":\"4111\"}"));
    }

    #[tokio::test]
    async fn test_encrypted_add_requires_string() {
        let mock = MockHttpClient::new();
        let hub = encrypted_client(&mock);

        let result = hub.add_content("secure", &json!({"not": "a string"})).await;

        assert!(is_invalid(result, "Content must be stringified when encrypting"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_group_callback_endpoints() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 200,
            body: "{}".to_string(),
        });
        let hub = client(&mock);

        let config = GroupCallbackConfig {
            batch: Some(BatchMode::Single),
            parallel_calls: Some(2),
            ..GroupCallbackConfig::new("orders_dev", "orders", "http://app/hub-callbacks/orders")
        };
        hub.create_group_callback(&config).await.unwrap();
        hub.update_group_callback(
            "orders_dev",
            &GroupCallbackUpdate {
                paused: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        hub.get_group_callbacks().await.unwrap();
        hub.delete_group_callback("orders_dev").await.unwrap();

        let calls = mock.get_calls();
        assert_eq!(calls[0].method, Method::Put);
        assert_eq!(calls[0].path, "/webhook/orders_dev");
        assert_eq!(
            calls[0].json_body(),
            json!({
                "channelUrl": "http://hub.example.com/channel/orders",
                "callbackUrl": "http://app/hub-callbacks/orders",
                "parallelCalls": 2,
                "batch": "SINGLE",
            })
        );
        assert_eq!(calls[1].json_body(), json!({"paused": false}));
        assert_eq!(calls[2].path, "/webhook");
        assert_eq!(calls[3].method, Method::Delete);
    }

    #[tokio::test]
    async fn test_group_callback_content_fetches_first_uri() {
        let mock = MockHttpClient::new();
        mock.add_json("GET /channel/orders/2024/01/01/a", 200, json!({"id": 1}));
        let hub = client(&mock);

        let data = GroupCallbackData {
            name: Some("orders_dev".to_string()),
            uris: vec!["http://hub.example.com/channel/orders/2024/01/01/a".to_string()],
        };
        let content = hub.get_group_callback_content(&data).await.unwrap();

        assert_eq!(content, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_alerts() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 200,
            body: "{}".to_string(),
        });
        let hub = client(&mock);

        let alert = ChannelAlert {
            source: "orders".to_string(),
            service_name: "pager".to_string(),
            time_window_minutes: 10,
            operator: AlertOperator::GreaterOrEqual,
            threshold: 100,
        };
        hub.channel_alert("orders_volume", &alert).await.unwrap();
        hub.alert_status("orders_volume").await.unwrap();

        let calls = mock.get_calls();
        assert_eq!(calls[0].path, "/alert/orders_volume");
        assert_eq!(calls[0].json_body()["operator"], json!(">="));
        assert_eq!(calls[0].json_body()["type"], json!("channel"));
        assert_eq!(calls[1].method, Method::Get);
    }

    #[tokio::test]
    async fn test_hub_error_status_is_returned() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "GET /channel/missing",
            Ok(HttpResponse {
                status: 404,
                body: "not found".to_string(),
            }),
        );
        let hub = client(&mock);

        let err = hub.get_channel("missing").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_queue_methods_share_one_queue() {
        let mock = MockHttpClient::new();
        mock.set_default_response(HttpResponse {
            status: 201,
            body: String::new(),
        });
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let hub = Datahub::builder(DatahubConfig::new("http://hub"))
            .http_client(Arc::new(mock.clone()))
            .on_queue_finished(move |report| sink.lock().push(report.clone()))
            .build()
            .unwrap();

        hub.add_content_to_queue("a", json!(1)).unwrap();
        hub.clone().add_content_to_queue("a", json!(2)).unwrap();
        assert_eq!(hub.queue().pending_count(), 2);
        assert_eq!(hub.queue_state(), QueueState::Running);

        let report = hub.send_queue().await;
        assert!(report.all_succeeded());
        assert_eq!(mock.calls_to("/channel/a")[0].json_body(), json!([1, 2]));
        assert_eq!(reports.lock().len(), 1);

        hub.stop_queue();
        assert_eq!(hub.queue_state(), QueueState::Stopped);
        hub.set_queue_enabled(false).unwrap();
        assert!(!hub.queue_enabled());
    }
}
