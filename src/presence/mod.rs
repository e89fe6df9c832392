//! Rich Presence payloads built from MPC playback state

mod mpc;

pub use mpc::MpcPresence;

use std::time::SystemTime;

use crate::media::MediaStatus;
use crate::rpc::RpcSession;

/// A transport-neutral Rich Presence activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    /// First line under the application name
    pub details: Option<String>,
    /// Second line
    pub state: Option<String>,
    /// Asset key or image URL for the large image
    pub large_image: String,
    pub large_text: Option<String>,
    /// Asset key for the small overlay image
    pub small_image: Option<String>,
    pub small_text: Option<String>,
    /// Show elapsed time counting from here
    pub start: Option<SystemTime>,
    /// Show remaining time counting down to here
    pub end: Option<SystemTime>,
}

/// Turns poll results into presence updates
pub trait PresenceUpdater: Send {
    /// Push presence for `status` to `rpc` if anything visible changed, or
    /// unconditionally when `force` is set.
    ///
    /// Returns whether a presence session is now being displayed. Calling it
    /// repeatedly with unchanged data and `force == false` sends nothing.
    fn update(
        &mut self,
        status: &MediaStatus,
        snapshot: Option<&str>,
        force: bool,
        rpc: &dyn RpcSession,
    ) -> bool;
}
