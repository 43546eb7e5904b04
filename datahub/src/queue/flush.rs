//! Flush executor: one bounded fan-out of channel sends per flush.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use super::QueueInner;
use crate::dispatch::RequestKind;
use crate::error::Result;
use crate::http::Method;

/// Identifies one flush in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlushId(Uuid);

impl FlushId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short, readable form like "flush_1a2b3c4d".
    pub fn to_short_string(&self) -> String {
        let hex = format!("{:x}", self.0.as_u128());
        format!("flush_{}", &hex[..8])
    }
}

impl Default for FlushId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_short_string())
    }
}

/// Result of sending one channel's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    pub channel_name: String,
    pub success: bool,
    pub error: Option<String>,
    /// Number of items in the batch
    pub item_count: usize,
}

/// Everything one flush did.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// `None` when the flush had nothing to send
    pub flush_id: Option<FlushId>,
    /// One entry per channel, sorted by channel name
    pub outcomes: Vec<FlushOutcome>,
    /// The payloads that were sent, per channel, in append order
    pub payloads: HashMap<String, Vec<Value>>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FlushOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

impl QueueInner {
    /// Send everything pending. Per-channel failures are folded into the
    /// report; this never fails as a whole.
    #[tracing::instrument(skip_all, fields(flush_id))]
    pub(super) async fn flush(&self) -> FlushReport {
        if !self.is_enabled() {
            return FlushReport::default();
        }
        let Some(batch) = self.store.snapshot_and_clear() else {
            return FlushReport::default();
        };

        let flush_id = FlushId::new();
        tracing::Span::current().record("flush_id", tracing::field::display(flush_id));
        info!(
            channels = batch.by_channel.len(),
            items = batch.pending_count,
            "Flushing queue"
        );

        let mut join_set = JoinSet::new();
        let mut channel_by_task = HashMap::new();

        for (channel, items) in &batch.by_channel {
            let dispatcher = self.dispatcher.clone();
            let permits = self.send_permits.clone();
            let url = format!("{}/channel/{}", self.base_url, channel);
            let name = channel.clone();
            let item_count = items.len();
            let body = self.batch_body(items);

            let handle = join_set.spawn(async move {
                // Held until the send settles; the semaphore is never closed.
                let _permit = permits.acquire_owned().await;

                let result = match body {
                    Ok((body, kind)) => dispatcher
                        .dispatch(&url, Method::Post, Some(&body), kind)
                        .await
                        .map(|_| ()),
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        info!(channel = %name, items = item_count, "Sent queued items");
                        FlushOutcome {
                            channel_name: name,
                            success: true,
                            error: None,
                            item_count,
                        }
                    }
                    Err(e) => {
                        error!(channel = %name, items = item_count, error = %e, "Failed to send queued items");
                        FlushOutcome {
                            channel_name: name,
                            success: false,
                            error: Some(e.to_string()),
                            item_count,
                        }
                    }
                }
            });
            channel_by_task.insert(handle.id(), (channel.clone(), item_count));
        }

        let mut outcomes = Vec::with_capacity(batch.by_channel.len());
        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(join_error) => {
                    error!(error = %join_error, "Channel send task panicked");
                    if let Some((channel_name, item_count)) = channel_by_task.remove(&join_error.id()) {
                        outcomes.push(FlushOutcome {
                            channel_name,
                            success: false,
                            error: Some(join_error.to_string()),
                            item_count,
                        });
                    }
                }
            }
        }
        outcomes.sort_by(|a, b| a.channel_name.cmp(&b.channel_name));

        self.complete_flush();

        let report = FlushReport {
            flush_id: Some(flush_id),
            outcomes,
            payloads: batch.by_channel,
        };

        if let Some(callback) = &self.on_finished {
            callback(&report);
        }

        report
    }

    /// The request body for one channel's items: a JSON array, or that array
    /// serialized and sent as a single encrypted item.
    fn batch_body(&self, items: &[Value]) -> Result<(Value, RequestKind)> {
        if self.dispatcher.encrypts() {
            let serialized = serde_json::to_string(items)?;
            Ok((Value::String(serialized), RequestKind::EncryptedItem))
        } else {
            Ok((Value::Array(items.to_vec()), RequestKind::PlainJson))
        }
    }
}
