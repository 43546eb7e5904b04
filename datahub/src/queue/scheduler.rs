//! Flush timer and the start/stop/finish state machine.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::QueueInner;
use crate::error::{DatahubError, Result};

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No timer armed
    Stopped,
    /// Timer armed
    Running,
    /// Finishing; the queue stops once the current or next flush settles
    Draining,
}

/// Cancels its timer task when dropped, so disarming is just dropping the handle.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    cancel: CancellationToken,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    /// `Some` iff a periodic flush is armed
    timer: Option<TimerHandle>,
    /// One-shot flag consumed by the next flush completion
    should_finish: bool,
    /// Set by `stop`/`finish`; appends neither arm the timer nor force flushes
    halted: bool,
}

impl SchedulerState {
    pub(crate) fn state(&self) -> QueueState {
        match (&self.timer, self.should_finish) {
            (_, true) => QueueState::Draining,
            (Some(_), false) => QueueState::Running,
            (None, false) => QueueState::Stopped,
        }
    }

    /// The flush about to start is the last one before `finish` takes
    /// effect. Disarm now so nothing else gets scheduled while it sends;
    /// `complete_flush` clears the flag.
    fn begin_final_flush(&mut self) {
        self.timer = None;
        self.halted = true;
    }

    fn halt(&mut self) {
        self.timer = None;
        self.should_finish = false;
        self.halted = true;
    }
}

fn spawn_timer(inner: &Arc<QueueInner>) -> Result<TimerHandle> {
    let runtime = Handle::try_current().map_err(|_| DatahubError::NoRuntime)?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = inner.timer_interval;
    let weak: Weak<QueueInner> = Arc::downgrade(inner);

    runtime.spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.on_tick();
                }
            }
        }
        debug!("Queue timer stopped");
    });

    debug!(interval = ?period, "Queue timer armed");
    Ok(TimerHandle { cancel })
}

impl QueueInner {
    pub(super) fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        scheduler.halted = false;
        scheduler.should_finish = false;
        if scheduler.timer.is_none() {
            scheduler.timer = Some(spawn_timer(self)?);
            info!("Queue started");
        }
        Ok(())
    }

    pub(super) fn stop(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.timer.is_some() {
            info!(pending = self.store.pending_count(), "Queue stopped");
        }
        scheduler.halt();
    }

    pub(super) fn finish(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.timer.is_some() {
            scheduler.should_finish = true;
            info!("Queue will stop after the next flush");
        }
    }

    /// React to the pending count after an append (or re-enable).
    pub(super) fn reschedule(self: &Arc<Self>, pending: usize) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.halted {
            return Ok(());
        }

        if pending >= self.max_pending {
            if scheduler.should_finish && self.is_enabled() {
                scheduler.begin_final_flush();
            } else {
                scheduler.timer = None;
            }
            drop(scheduler);
            if self.is_enabled() {
                debug!(pending, max_pending = self.max_pending, "Queue full, flushing now");
                self.spawn_flush()?;
            }
        } else if scheduler.timer.is_none() && self.is_enabled() {
            scheduler.timer = Some(spawn_timer(self)?);
        }
        Ok(())
    }

    fn on_tick(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }

        let mut scheduler = self.scheduler.lock();
        if self.store.pending_count() == 0 {
            if scheduler.should_finish {
                scheduler.halt();
                info!("Queue drained, timer stopped");
            }
            return;
        }
        if scheduler.should_finish {
            scheduler.begin_final_flush();
        }
        drop(scheduler);

        if let Err(e) = self.spawn_flush() {
            tracing::error!(error = %e, "Failed to start queue flush");
        }
    }

    fn spawn_flush(self: &Arc<Self>) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| DatahubError::NoRuntime)?;
        let inner = self.clone();
        runtime.spawn(async move {
            inner.flush().await;
        });
        Ok(())
    }

    /// Consume the finish flag once a flush has settled.
    pub(super) fn complete_flush(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.should_finish {
            scheduler.halt();
            info!("Queue finished");
        }
    }
}
