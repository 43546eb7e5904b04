//! Hub forwarder: post incoming webhook bodies straight into a channel.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::client::Datahub;
use crate::config::{DatahubConfig, ForwarderConfig};
use crate::error::{DatahubError, Result};
use crate::queue::is_blank;

/// Turns a request body into the item to store. `None` rejects the request.
pub type Transformer = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
struct ForwardTarget {
    hub: Datahub,
    channel: String,
    transformer: Option<Transformer>,
}

impl ForwardTarget {
    async fn forward(&self, body: Bytes) -> StatusCode {
        let content = match self.prepare(&body) {
            Ok(content) => content,
            Err(e) => {
                error!(channel = %self.channel, error = %e, "Error preparing request for hub channel");
                return StatusCode::UNPROCESSABLE_ENTITY;
            }
        };

        match self.hub.add_content(&self.channel, &content).await {
            Ok(_) => {
                info!(channel = %self.channel, "Forwarded request to hub channel");
                StatusCode::OK
            }
            Err(e) => {
                error!(channel = %self.channel, error = %e, "Error forwarding request to hub channel");
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }

    fn prepare(&self, body: &[u8]) -> Result<Value> {
        let parsed: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body)?
        };

        let content = match &self.transformer {
            Some(transform) => transform(&parsed),
            None => Some(parsed),
        };

        content.filter(|c| !is_blank(c)).ok_or_else(|| {
            DatahubError::InvalidRequest(format!("Nothing to post to hub channel {}", self.channel))
        })
    }
}

/// Builds a router whose POST routes each write their body to a hub channel.
///
/// ```ignore
/// let app = HubForwarder::new(&ForwarderConfig::new("http://hub"))?
///     .forward_to_channel("/sendgrid/webhook", "email_receipts")
///     .into_router();
/// ```
pub struct HubForwarder {
    hub: Datahub,
    router: Router,
}

impl HubForwarder {
    pub fn new(config: &ForwarderConfig) -> Result<Self> {
        let hub_host = config
            .hub_host
            .resolve(&config.environment)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                DatahubError::Config(format!("Missing \"hub_host.{}\"", config.environment))
            })?;
        Ok(Self::with_datahub(Datahub::new(DatahubConfig::new(hub_host))?))
    }

    pub fn with_datahub(hub: Datahub) -> Self {
        Self {
            hub,
            router: Router::new(),
        }
    }

    /// Store each JSON body posted to `route` in `channel` as is.
    ///
    /// Panics if `route` is not a valid axum path.
    pub fn forward_to_channel(self, route: &str, channel: &str) -> Self {
        self.add_route(route, channel, None)
    }

    /// Like [`Self::forward_to_channel`], storing what `transformer` returns.
    pub fn forward_with<F>(self, route: &str, channel: &str, transformer: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.add_route(route, channel, Some(Arc::new(transformer)))
    }

    fn add_route(mut self, route: &str, channel: &str, transformer: Option<Transformer>) -> Self {
        info!(route, channel, "Adding forwarding route");
        let target = ForwardTarget {
            hub: self.hub.clone(),
            channel: channel.to_string(),
            transformer,
        };
        self.router = self.router.route(
            route,
            post(move |body: Bytes| async move { target.forward(body).await }),
        );
        self
    }

    pub fn into_router(self) -> Router {
        self.router.layer(TraceLayer::new_for_http())
    }
}
