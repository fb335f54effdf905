//! Stall watchdog. Reports per-pair progress and pairs that received
//! nothing during the last period.
//!
//! Runs as one persistent task on a fixed interval, so two runs can never
//! overlap. Stopping the [`WatchdogHandle`] (or dropping it) ends the task.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::tracking::{TrackingSnapshot, TransferTracking};

/// Outcome of one watchdog run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// Pairs that received data this period, with the interval byte count.
    pub progressed: Vec<TrackingSnapshot>,
    /// Pairs that received nothing this period.
    pub stalled: Vec<TrackingSnapshot>,
}

impl WatchdogReport {
    /// `pair:total` for every stalled pair, comma separated.
    pub fn stalled_summary(&self) -> String {
        self.stalled
            .iter()
            .map(|s| format!("{}:{}", s.pair, s.bytes_total))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone)]
pub struct Watchdog {
    tracking: TransferTracking,
    period: Duration,
}

impl Watchdog {
    pub fn new(tracking: TransferTracking, period: Duration) -> Self {
        Self { tracking, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Inspect and reset the interval counters once.
    pub fn run_once(&self) -> WatchdogReport {
        let entries = self.tracking.snapshot_and_reset();
        tracing::info!(tracked = entries.len(), "running snapshot receiver watchdog");

        let period_secs = self.period.as_secs();
        let mut report = WatchdogReport::default();
        for entry in entries {
            if entry.bytes_since_last_check == 0 {
                report.stalled.push(entry);
                continue;
            }
            tracing::info!(
                pair = %entry.pair,
                bytes = entry.bytes_since_last_check,
                period_secs,
                total = entry.bytes_total,
                "rejoin snapshot progress"
            );
            report.progressed.push(entry);
        }

        if !report.stalled.is_empty() {
            tracing::info!(
                period_secs,
                stalled = %report.stalled_summary(),
                "rejoin snapshot received no data"
            );
        }
        report
    }

    /// Start the recurring task. The first run happens one period from now.
    pub fn spawn(self) -> WatchdogHandle {
        let (stop_tx, mut stop_rx) = broadcast::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::debug!("watchdog stopped");
                        return;
                    }

                    _ = interval.tick() => {
                        self.run_once();
                    }
                }
            }
        });
        WatchdogHandle { stop_tx, task }
    }
}

/// Owns the running watchdog task.
pub struct WatchdogHandle {
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Ask the task to stop. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "watchdog task failed");
        }
    }
}
