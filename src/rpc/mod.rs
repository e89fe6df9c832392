//! Chat-client RPC transport
//!
//! The bridge only needs three things from the transport: a way to log in,
//! a way to push an activity, and a notification when the link drops.

mod discord;

pub use discord::DiscordConnector;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::presence::Activity;

/// A live, logged-in RPC session
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Queue an activity update. Delivery failures are logged by the transport.
    fn set_activity(&self, activity: Activity);

    /// Gracefully close the session and wait until the transport is gone
    async fn destroy(&self) -> Result<()>;
}

/// Result of a successful login
pub struct RpcLink {
    pub session: Box<dyn RpcSession>,
    /// Resolves once the transport has closed, for whatever reason
    pub closed: oneshot::Receiver<()>,
}

/// Creates sessions
#[async_trait]
pub trait RpcConnector: Send + Sync {
    /// Attempt a single login. Must give up within a bounded time.
    async fn login(&self) -> Result<RpcLink>;
}
