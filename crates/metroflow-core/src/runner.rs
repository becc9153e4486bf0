//! Tick loop driver.
//!
//! [`run_loop`] executes a tick, then sleeps for the tick interval, until
//! a stop is requested. A tick that fails as a whole is logged and the
//! loop carries on; only a stop request ends it. The tick in progress when
//! a stop arrives always completes.

use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::engine::Engine;

/// Result of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    /// Ticks executed successfully during this run.
    pub ticks_run: u64,
    /// Ticks that failed as a whole.
    pub ticks_failed: u64,
    /// Tick number when the loop exited.
    pub final_tick: u64,
}

/// Drive `engine` until a stop is requested.
pub async fn run_loop(engine: Engine) -> LoopSummary {
    let control = engine.control();
    let mut ticks_run: u64 = 0;
    let mut ticks_failed: u64 = 0;
    let mut final_tick: u64 = 0;

    info!(tick_interval_ms = control.tick_interval_ms(), "simulation loop starting");

    loop {
        // --- Check stop request (before tick) ---
        if control.is_stop_requested() {
            info!("stop requested");
            break;
        }

        // --- Execute tick ---
        match engine.step().await {
            Ok(report) => {
                ticks_run = ticks_run.saturating_add(1);
                final_tick = report.tick;
            }
            Err(e) => {
                ticks_failed = ticks_failed.saturating_add(1);
                error!(error = %e, "tick failed, continuing");
            }
        }

        // --- Sleep for tick interval, waking early on stop ---
        tokio::select! {
            () = sleep(Duration::from_millis(control.sleep_ms())) => {}
            () = control.stopped() => {}
        }
    }

    control.mark_stopped();
    info!(ticks_run, ticks_failed, final_tick, "simulation loop stopped");
    LoopSummary {
        ticks_run,
        ticks_failed,
        final_tick,
    }
}
