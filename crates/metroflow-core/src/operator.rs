//! Control state shared between the [`Engine`] handle and the tick loop.
//!
//! The loop task reads these fields between ticks; callers flip them from
//! any task or thread. None of them sit behind the simulation-state lock,
//! so stopping the engine or ingesting a traffic snapshot never waits for
//! an in-flight tick.
//!
//! [`Engine`]: crate::engine::Engine

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use metroflow_types::TrafficFlowData;
use tokio::sync::Notify;

/// Smallest inter-tick sleep, milliseconds.
pub const MIN_TICK_SLEEP_MS: u64 = 10;

/// Lifecycle flags, tick pacing, and the pending traffic snapshot slot.
#[derive(Debug)]
pub struct ControlState {
    /// Whether a loop task currently owns the tick cycle.
    running: AtomicBool,

    /// Whether the loop has been asked to exit.
    stop_requested: AtomicBool,

    /// Wakes the loop out of its inter-tick sleep.
    wake: Notify,

    /// Current tick interval in milliseconds.
    tick_interval_ms: AtomicU64,

    /// Latest traffic snapshot not yet applied by a tick.
    pending_flow: Mutex<Option<TrafficFlowData>>,
}

impl ControlState {
    /// Create a stopped control state.
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            tick_interval_ms: AtomicU64::new(tick_interval_ms),
            pending_flow: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move from STOPPED to RUNNING. Returns `false` if already running.
    pub fn try_start(&self) -> bool {
        let started = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            self.stop_requested.store(false, Ordering::Release);
        }
        started
    }

    /// Whether a loop task owns the tick cycle.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to exit after the current tick and wake it.
    ///
    /// Safe to call any number of times. Only tasks already waiting in
    /// [`stopped`](Self::stopped) are woken; no permit is left behind for a
    /// later run.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record that the loop has exited.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Resolve once a stop has been requested.
    ///
    /// Returns at once if the stop flag is already set. The waiter is
    /// registered before the flag is read, so a stop racing with this call
    /// is never missed.
    pub async fn stopped(&self) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stop_requested() {
            return;
        }
        notified.await;
    }

    // -----------------------------------------------------------------------
    // Tick pacing
    // -----------------------------------------------------------------------

    /// Configured tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Replace the tick interval. Takes effect on the next sleep.
    pub fn set_tick_interval_ms(&self, ms: u64) {
        self.tick_interval_ms.store(ms, Ordering::Release);
    }

    /// Sleep length between ticks, never below [`MIN_TICK_SLEEP_MS`].
    pub fn sleep_ms(&self) -> u64 {
        self.tick_interval_ms().max(MIN_TICK_SLEEP_MS)
    }

    // -----------------------------------------------------------------------
    // Traffic snapshot slot
    // -----------------------------------------------------------------------

    /// Store a traffic snapshot for the next tick, replacing any snapshot
    /// that has not been applied yet.
    pub fn offer_flow(&self, flow: TrafficFlowData) {
        let mut slot = self.pending_flow.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(flow);
    }

    /// Take the pending traffic snapshot, if any.
    pub fn take_flow(&self) -> Option<TrafficFlowData> {
        self.pending_flow
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use metroflow_types::BoundingBox;

    use super::*;

    fn flow(source: &str) -> TrafficFlowData {
        TrafficFlowData::from_segments(
            Vec::new(),
            BoundingBox {
                north: 1.0,
                south: 0.0,
                east: 1.0,
                west: 0.0,
            },
            Utc::now(),
            source,
        )
    }

    #[test]
    fn initial_state_is_stopped() {
        let control = ControlState::new(100);
        assert!(!control.is_running());
        assert!(!control.is_stop_requested());
    }

    #[test]
    fn start_is_exclusive() {
        let control = ControlState::new(100);
        assert!(control.try_start());
        assert!(!control.try_start());
        control.mark_stopped();
        assert!(control.try_start());
    }

    #[test]
    fn start_clears_a_previous_stop_request() {
        let control = ControlState::new(100);
        control.request_stop();
        control.request_stop();
        assert!(control.is_stop_requested());
        assert!(control.try_start());
        assert!(!control.is_stop_requested());
    }

    #[test]
    fn sleep_is_floored() {
        let control = ControlState::new(0);
        assert_eq!(control.sleep_ms(), MIN_TICK_SLEEP_MS);
        control.set_tick_interval_ms(250);
        assert_eq!(control.sleep_ms(), 250);
    }

    #[test]
    fn last_offered_flow_wins() {
        let control = ControlState::new(100);
        control.offer_flow(flow("first"));
        control.offer_flow(flow("second"));
        assert_eq!(control.take_flow().map(|f| f.source), Some("second".to_owned()));
        assert!(control.take_flow().is_none());
    }

    #[tokio::test]
    async fn stop_before_waiting_is_still_observed() {
        let control = ControlState::new(100);
        assert!(control.try_start());
        control.request_stop();
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), control.stopped()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn stop_while_stopped_does_not_wake_the_next_run() {
        let control = ControlState::new(100);
        control.request_stop();
        control.request_stop();
        assert!(control.try_start());
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), control.stopped()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn stop_wakes_a_waiter() {
        let control = std::sync::Arc::new(ControlState::new(100));
        let waiter = {
            let control = std::sync::Arc::clone(&control);
            tokio::spawn(async move { control.stopped().await })
        };
        tokio::task::yield_now().await;
        control.request_stop();
        assert!(waiter.await.is_ok());
    }
}
