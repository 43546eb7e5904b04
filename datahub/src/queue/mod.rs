//! Batching write queue.
//!
//! Content added with [`ContentQueue::add`] is held in memory per channel and
//! sent as one JSON array per channel when the flush timer fires, when the
//! pending count reaches `max_pending`, or when [`ContentQueue::flush`] is
//! called directly.
//!
//! ```text
//! add() ──► QueueStore.append ──► Scheduler
//!                                   ├─ pending >= max_pending ─► disarm timer, spawn flush
//!                                   └─ otherwise ─────────────► arm timer (if not armed)
//! timer tick ─► enabled && pending > 0 ─► spawn flush
//! flush ─► snapshot_and_clear ─► one POST per channel (bounded) ─► FlushReport ─► callback
//! ```
//!
//! Delivery is at-most-once: a channel batch whose send fails is logged,
//! reported as failed and dropped. The queue lives in memory only and is lost
//! when the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::QueueConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DatahubError, Result};

mod flush;
mod scheduler;
mod store;

pub use flush::{FlushId, FlushOutcome, FlushReport};
pub use scheduler::QueueState;
pub use store::PendingBatch;

use scheduler::SchedulerState;
use store::QueueStore;

/// Invoked with the report of every flush that sent something.
pub type FlushCallback = Arc<dyn Fn(&FlushReport) + Send + Sync>;

pub(crate) struct QueueInner {
    enabled: AtomicBool,
    timer_interval: Duration,
    max_pending: usize,
    base_url: String,
    store: QueueStore,
    scheduler: Mutex<SchedulerState>,
    dispatcher: Dispatcher,
    send_permits: Arc<Semaphore>,
    on_finished: Option<FlushCallback>,
}

impl QueueInner {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Handle to a client's write queue. Cheap to clone.
#[derive(Clone)]
pub struct ContentQueue {
    inner: Arc<QueueInner>,
}

impl ContentQueue {
    pub(crate) fn new(
        config: &QueueConfig,
        base_url: String,
        dispatcher: Dispatcher,
        on_finished: Option<FlushCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                enabled: AtomicBool::new(config.enabled),
                timer_interval: config.timer_interval,
                max_pending: config.max_pending,
                base_url,
                store: QueueStore::new(),
                scheduler: Mutex::new(SchedulerState::default()),
                dispatcher,
                send_permits: Arc::new(Semaphore::new(config.max_concurrent_sends)),
                on_finished,
            }),
        }
    }

    /// Queue `content` for `channel`.
    ///
    /// Never blocks. Reaching `max_pending` forces an immediate flush;
    /// otherwise the flush timer is armed if it isn't already. After
    /// [`Self::stop`] (or a completed [`Self::finish`]) items are held
    /// without scheduling anything until [`Self::start`].
    ///
    /// Must be called from within a Tokio runtime. Outside one this returns
    /// [`DatahubError::NoRuntime`] and nothing is queued.
    pub fn add(&self, channel: &str, content: Value) -> Result<()> {
        if channel.is_empty() {
            return Err(DatahubError::missing("channel name"));
        }
        if is_blank(&content) {
            return Err(DatahubError::missing("content"));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DatahubError::NoRuntime);
        }

        let pending = self.inner.store.append(channel, content);
        tracing::trace!(channel, pending, "Queued content");
        self.inner.reschedule(pending)
    }

    /// Arm the flush timer and cancel a pending [`Self::finish`]. The timer
    /// is left alone when it is already armed.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Disarm the flush timer. In-flight sends are not cancelled.
    pub fn stop(&self) {
        self.inner.stop()
    }

    /// Let the next flush run, then stop the timer.
    pub fn finish(&self) {
        self.inner.finish()
    }

    /// Flush now. Returns an empty report when disabled or nothing is pending.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush().await
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Enable or disable flushing. Enabling resumes scheduling for items
    /// already pending.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        let pending = self.inner.store.pending_count();
        if enabled && pending > 0 {
            self.inner.reschedule(pending)?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.store.pending_count()
    }

    pub fn state(&self) -> QueueState {
        self.inner.scheduler.lock().state()
    }
}

/// Values the queue refuses, mirroring the client's "Missing content" check.
pub(crate) fn is_blank(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
