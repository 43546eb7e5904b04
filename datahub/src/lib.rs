//! Client for the hub channel store, with a batching write queue.
//!
//! This crate provides:
//! - A [`Datahub`] client covering channels, content, group callbacks and alerts
//! - Optional per-item encryption of channel content
//! - A write queue that batches items per channel and flushes them on a
//!   timer, at a size threshold, or on demand
//! - [`HubWatcher`] and [`HubForwarder`], axum routers for receiving group
//!   callbacks and forwarding webhooks into channels
//!
//! # Example
//! ```ignore
//! use datahub::{Datahub, DatahubConfig};
//!
//! let hub = Datahub::builder(DatahubConfig::new("hub.example.com"))
//!     .on_queue_finished(|report| {
//!         for failure in report.failures() {
//!             tracing::warn!(channel = %failure.channel_name, "Batch dropped");
//!         }
//!     })
//!     .build()?;
//!
//! // Written in one request per channel on the next flush
//! hub.add_content_to_queue("orders", json!({"id": 1}))?;
//! hub.add_content_to_queue("orders", json!({"id": 2}))?;
//!
//! // Drain before shutdown
//! hub.finish_queue();
//! let report = hub.send_queue().await;
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod http;
pub mod models;
pub mod queue;
pub mod watcher;

// Re-export commonly used types
pub use client::{Datahub, DatahubBuilder};
pub use config::{DatahubConfig, ForwarderConfig, HostConfig, QueueConfig, WatcherConfig};
pub use crypto::{AesGcmCipher, Cipher};
pub use dispatch::{Dispatcher, HubResponse, RequestKind};
pub use error::{DatahubError, Result};
pub use forwarder::HubForwarder;
pub use http::{HttpClient, HttpResponse, Method, MockHttpClient, ReqwestHttpClient};
pub use models::*;
pub use queue::{ContentQueue, FlushId, FlushOutcome, FlushReport, QueueState};
pub use watcher::HubWatcher;
