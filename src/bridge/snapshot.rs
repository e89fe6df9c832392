//! Periodic snapshot refresh while MPC is reachable

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, error};

use super::{every, Completion};
use crate::upload::{SnapshotError, SnapshotPipeline};

/// Owns the snapshot timer slot and the cached snapshot URL
pub(crate) struct SnapshotRefresher {
    /// `None` when uploads are disabled; the refresher then never runs
    pipeline: Option<Arc<dyn SnapshotPipeline>>,
    period: Duration,
    timer: Option<Interval>,
    epoch: u64,
    in_flight: bool,
    /// Last uploaded snapshot. Survives halts so presence keeps showing it.
    reference: Option<String>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl SnapshotRefresher {
    pub(crate) fn new(
        pipeline: Option<Arc<dyn SnapshotPipeline>>,
        period: Duration,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            pipeline,
            period,
            timer: None,
            epoch: 0,
            in_flight: false,
            reference: None,
            completions,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub(crate) fn timer(&mut self) -> Option<&mut Interval> {
        self.timer.as_mut()
    }

    pub(crate) fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Refresh immediately and every period after. No-op while running.
    pub(crate) fn start(&mut self) {
        if self.is_running() || self.pipeline.is_none() {
            return;
        }
        self.timer = Some(every(self.period));
        self.refresh_now();
    }

    /// Stop refreshing and forget any cycle in flight
    pub(crate) fn halt(&mut self) {
        self.timer = None;
        self.epoch += 1;
        self.in_flight = false;
    }

    pub(crate) fn on_tick(&mut self) {
        if self.in_flight {
            debug!("Previous snapshot cycle still running, skipping tick");
            return;
        }
        self.refresh_now();
    }

    /// Apply a finished cycle. Failures leave the cached reference alone.
    pub(crate) fn on_result(&mut self, epoch: u64, result: Result<String, SnapshotError>) {
        if epoch != self.epoch {
            debug!("Dropping snapshot from cancelled epoch {}", epoch);
            return;
        }
        self.in_flight = false;

        match result {
            Ok(url) => self.reference = Some(url),
            Err(e) => error!("Error on transferring snapshot: {}", e),
        }
    }

    fn refresh_now(&mut self) {
        let Some(pipeline) = self.pipeline.clone() else {
            return;
        };
        self.in_flight = true;

        let epoch = self.epoch;
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = pipeline.refresh().await;
            let _ = completions.send(Completion::Snapshot { epoch, result });
        });
    }
}
