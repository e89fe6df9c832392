//! MPC status polling with a fast and a slow cadence

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::debug;

use super::{every, Completion};
use crate::media::MediaSource;

/// Current polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// Not polling (Discord link is down)
    Idle,
    /// MPC unreachable or not yet seen
    Slow,
    /// MPC answered the last poll
    Fast,
}

/// Owns the poll timer slot and the single outstanding request
pub(crate) struct PollController {
    media: Arc<dyn MediaSource>,
    regime: Regime,
    timer: Option<Interval>,
    fast: Duration,
    slow: Duration,
    /// Bumped on every start/halt; results from older epochs are dropped
    epoch: u64,
    in_flight: bool,
    completions: mpsc::UnboundedSender<Completion>,
}

impl PollController {
    pub(crate) fn new(
        media: Arc<dyn MediaSource>,
        fast: Duration,
        slow: Duration,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            media,
            regime: Regime::Idle,
            timer: None,
            fast,
            slow,
            epoch: 0,
            in_flight: false,
            completions,
        }
    }

    #[cfg(test)]
    pub(crate) fn regime(&self) -> Regime {
        self.regime
    }

    pub(crate) fn timer(&mut self) -> Option<&mut Interval> {
        self.timer.as_mut()
    }

    pub(crate) fn endpoint(&self) -> String {
        self.media.endpoint()
    }

    /// Poll once right away, then settle on the slow cadence until MPC answers
    pub(crate) fn start(&mut self) {
        self.epoch += 1;
        self.in_flight = false;
        self.set_regime(Regime::Slow);
        self.poll_now();
    }

    /// Stop polling and forget any request in flight
    pub(crate) fn halt(&mut self) {
        self.epoch += 1;
        self.in_flight = false;
        self.set_regime(Regime::Idle);
    }

    pub(crate) fn on_success(&mut self) {
        if self.regime == Regime::Slow {
            self.set_regime(Regime::Fast);
        }
    }

    pub(crate) fn on_failure(&mut self) {
        if self.regime == Regime::Fast {
            self.set_regime(Regime::Slow);
        }
    }

    pub(crate) fn on_tick(&mut self) {
        if self.in_flight {
            debug!("Previous status poll still in flight, skipping tick");
            return;
        }
        self.poll_now();
    }

    /// Accept a finished poll. Returns false for results of a cancelled epoch.
    pub(crate) fn accept(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            debug!("Dropping status poll from cancelled epoch {}", epoch);
            return false;
        }
        self.in_flight = false;
        true
    }

    /// Replace the timer slot; the old interval is dropped before the new one exists
    fn set_regime(&mut self, regime: Regime) {
        self.timer = None;
        self.regime = regime;
        self.timer = match regime {
            Regime::Idle => None,
            Regime::Slow => Some(every(self.slow)),
            Regime::Fast => Some(every(self.fast)),
        };
    }

    fn poll_now(&mut self) {
        self.in_flight = true;

        let epoch = self.epoch;
        let media = self.media.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = media.poll_status().await;
            let _ = completions.send(Completion::Poll { epoch, result });
        });
    }
}
