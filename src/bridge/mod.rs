//! Bridge engine - keeps Discord presence in step with MPC playback
//!
//! Two state machines run side by side: the Discord link (retry until
//! logged in, relink on closure) and MPC polling (fast while reachable,
//! slow otherwise), plus a snapshot refresher that only runs while MPC
//! answers. They meet in [`Bridge`], which owns all of their state and
//! applies every event on a single task.

mod engine;
mod link;
mod poll;
mod snapshot;

pub use engine::{Bridge, Collaborators};

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::media::{MediaStatus, PollError};
use crate::rpc::RpcLink;
use crate::upload::SnapshotError;

/// Commands that can be sent to the bridge
#[derive(Debug, Clone)]
pub enum BridgeCommand {
    /// Tear down the Discord link and stop the engine
    Shutdown,
}

/// Everything the two state machines tell each other
#[derive(Debug)]
pub enum BridgeEvent {
    /// A status poll succeeded
    MediaConnected(MediaStatus),
    /// A status poll failed
    MediaError(PollError),
    /// Discord login succeeded
    RpcConnected,
    /// The Discord transport closed
    RpcDisconnected,
}

/// Results of background work, reported back to the engine task.
///
/// Each carries the id or epoch it was started under so results that
/// outlived a cancellation can be recognized and dropped.
pub(crate) enum Completion {
    Login {
        attempt: u64,
        result: anyhow::Result<RpcLink>,
    },
    LinkClosed {
        link: u64,
    },
    Poll {
        epoch: u64,
        result: Result<MediaStatus, PollError>,
    },
    Snapshot {
        epoch: u64,
        result: Result<String, SnapshotError>,
    },
}

/// Create the command channel for the bridge
pub fn create_bridge_channels() -> (mpsc::Sender<BridgeCommand>, mpsc::Receiver<BridgeCommand>) {
    mpsc::channel(8)
}

/// A repeating timer whose first tick is one full period away
fn every(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Wait for the next tick of an optional timer slot; never resolves when empty
async fn tick(slot: Option<&mut Interval>) {
    match slot {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
