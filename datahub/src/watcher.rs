//! Hub watcher: receive a channel's new items as group callbacks.
//!
//! [`HubWatcher::watch_channel`] does two things: it registers a handler that
//! the watcher's router serves at `POST /hub-callbacks/{channel}`, and the
//! first time a channel is watched it makes sure the hub has a group callback
//! named `{channel}_{environment}` pointing at that route.
//!
//! ```ignore
//! let watcher = HubWatcher::new(WatcherConfig::new("http://hub", "http://localhost:3000"))?;
//! watcher
//!     .watch_channel("orders", |content, uri| async move {
//!         tracing::info!(%uri, "Got order");
//!         process(content).await
//!     })
//!     .await?;
//! let app = Router::new().merge(watcher.router());
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::UdpSocket;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::client::Datahub;
use crate::config::{DatahubConfig, WatcherConfig};
use crate::error::{DatahubError, Result};
use crate::models::{GroupCallbackConfig, GroupCallbackData};

/// Handles one item delivered by the hub: `(content, item_uri)`.
pub type CallbackHandler = Arc<dyn Fn(Value, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

const CALLBACK_ROUTE_PREFIX: &str = "/hub-callbacks";

struct WatcherState {
    hub: Datahub,
    handlers: RwLock<HashMap<String, CallbackHandler>>,
}

/// Registers hub group callbacks and serves their deliveries.
pub struct HubWatcher {
    state: Arc<WatcherState>,
    config: WatcherConfig,
    app_host: String,
    /// Channels whose hub callback has been initialized
    initialized: Mutex<HashSet<String>>,
}

fn resolve_host(host: &crate::config::HostConfig, field: &str, environment: &str) -> Result<String> {
    host.resolve(environment)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DatahubError::Config(format!("Missing \"{}.{}\"", field, environment)))
}

/// Callback group name for a channel in an environment.
pub fn callback_name(channel: &str, environment: &str) -> String {
    format!("{}_{}", channel, environment)
}

/// Route the watcher serves for a channel.
pub fn callback_route(channel: &str) -> String {
    format!("{}/{}", CALLBACK_ROUTE_PREFIX, channel)
}

impl HubWatcher {
    /// Watcher talking to the hub over the default transport.
    pub fn new(config: WatcherConfig) -> Result<Self> {
        let hub_host = resolve_host(&config.hub_host, "hub_host", &config.environment)?;
        let hub = Datahub::new(DatahubConfig::new(hub_host))?;
        Self::with_datahub(config, hub)
    }

    /// Watcher using an already built client for hub calls.
    pub fn with_datahub(config: WatcherConfig, hub: Datahub) -> Result<Self> {
        let app_host = resolve_host(&config.app_host, "app_host", &config.environment)?;
        Ok(Self {
            state: Arc::new(WatcherState {
                hub,
                handlers: RwLock::new(HashMap::new()),
            }),
            config,
            app_host,
            initialized: Mutex::new(HashSet::new()),
        })
    }

    /// Router serving `POST /hub-callbacks/{channel}` for every watched channel.
    ///
    /// Channels watched after the router is built are served as well.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&format!("{}/{{channel}}", CALLBACK_ROUTE_PREFIX), post(handle_callback))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Route `channel`'s deliveries to `handler` and make sure the hub
    /// callback exists. Watching a channel again replaces its handler
    /// without touching the hub.
    ///
    /// Hub errors while setting up the callback are logged, not returned.
    /// The only error is failing to build the callback URL.
    pub async fn watch_channel<F, Fut>(&self, channel: &str, handler: F) -> Result<()>
    where
        F: Fn(Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if channel.is_empty() {
            return Err(DatahubError::missing("channel name"));
        }

        let boxed: CallbackHandler = Arc::new(
            move |content: Value, uri: String| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(content, uri))
            },
        );
        self.state
            .handlers
            .write()
            .insert(channel.to_string(), boxed);

        if self.initialized.lock().contains(channel) {
            debug!(channel, "Hub callback already initialized");
            return Ok(());
        }

        self.init_callback(channel).await?;
        self.initialized.lock().insert(channel.to_string());
        Ok(())
    }

    /// Full URL the hub should call for `channel`.
    pub fn callback_url(&self, channel: &str) -> Result<String> {
        let url = format!("{}{}", self.app_host, callback_route(channel));
        if !url.contains("localhost") {
            return Ok(url);
        }
        let ip = local_ip_address(self.config.callback_ip.as_deref())?;
        Ok(url.replacen("localhost", &ip, 1))
    }

    #[tracing::instrument(skip(self), fields(environment = %self.config.environment))]
    async fn init_callback(&self, channel: &str) -> Result<()> {
        let name = callback_name(channel, &self.config.environment);
        let config = GroupCallbackConfig {
            parallel_calls: self.config.hub_parallel_calls,
            ..GroupCallbackConfig::new(name.clone(), channel, self.callback_url(channel)?)
        };
        let hub = &self.state.hub;

        match hub.get_group_callback(&name).await {
            Ok(existing) => {
                let current = existing.get("callbackUrl").and_then(Value::as_str);
                if current == Some(config.callback_url.as_str()) {
                    debug!(callback = %name, "Hub callback configured");
                    return Ok(());
                }

                info!(
                    callback = %name,
                    from = current.unwrap_or_default(),
                    to = %config.callback_url,
                    "Updating group callback URL"
                );
                match hub.delete_group_callback(&name).await {
                    Ok(_) => {
                        info!(callback = %name, "Deleted hub callback");
                        create_callback(hub, &config).await;
                    }
                    Err(e) => error!(callback = %name, error = %e, "Error deleting hub callback"),
                }
            }
            Err(e) if e.status() == Some(404) => {
                info!(callback = %name, url = %config.callback_url, "Creating nonexistent callback");
                create_callback(hub, &config).await;
            }
            Err(e) => error!(callback = %name, error = %e, "Error retrieving group callback"),
        }
        Ok(())
    }
}

async fn create_callback(hub: &Datahub, config: &GroupCallbackConfig) {
    match hub.create_group_callback(config).await {
        Ok(_) => info!(callback = %config.name, "Created hub callback"),
        Err(e) => error!(callback = %config.name, error = %e, "Failed to create callback"),
    }
}

/// Address that replaces `localhost` in callback URLs: the configured
/// override, the `IP` environment variable, or the address of the interface
/// that routes outbound traffic.
fn local_ip_address(configured: Option<&str>) -> Result<String> {
    if let Some(ip) = configured {
        return Ok(ip.to_string());
    }
    if let Ok(ip) = std::env::var("IP") {
        if !ip.is_empty() {
            debug!(%ip, "Using IP environment variable for hub callbacks");
            return Ok(ip);
        }
    }

    // Connecting a UDP socket sends nothing; it only picks the outbound interface.
    let detected = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("10.255.255.255:1")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified() && !ip.is_loopback());

    match detected {
        Some(ip) => {
            info!(%ip, "Detected local IP for hub callbacks");
            Ok(ip.to_string())
        }
        None => Err(DatahubError::Config(
            "Unable to get local IP address. Set the IP environment variable to your 10.x.x.x address."
                .to_string(),
        )),
    }
}

async fn handle_callback(
    State(state): State<Arc<WatcherState>>,
    Path(channel): Path<String>,
    body: Bytes,
) -> StatusCode {
    let handler = state.handlers.read().get(&channel).cloned();
    let Some(handler) = handler else {
        warn!(%channel, "Callback for a channel that is not watched");
        return StatusCode::NOT_FOUND;
    };

    match deliver(&state.hub, &handler, &body).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(%channel, error = %e, "Error handling hub callback");
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

async fn deliver(hub: &Datahub, handler: &CallbackHandler, body: &[u8]) -> Result<()> {
    let data: GroupCallbackData = serde_json::from_slice(body)?;
    if data.uris.len() > 1 {
        return Err(DatahubError::InvalidRequest(format!(
            "Expected one callback URI but got {}",
            data.uris.len()
        )));
    }

    let content = hub.get_group_callback_content(&data).await?;
    let uri = data.uris.into_iter().next().unwrap_or_default();

    handler(content, uri).await.map_err(DatahubError::Other)
}
