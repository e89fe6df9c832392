//! Discord link lifecycle
//!
//! `Disconnected -> Connecting -> Connected -> (Closing ->) Disconnected`,
//! with a fixed-interval retry timer armed whenever no session is live.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

use super::{every, BridgeEvent, Completion};
use crate::rpc::{RpcConnector, RpcLink, RpcSession};

/// Where the link currently is
pub(crate) enum LinkState {
    /// No session and no login in flight
    Disconnected,
    /// A login attempt is in flight
    Connecting { attempt: u64 },
    /// Logged in; the only place a session handle lives
    Connected {
        link: u64,
        session: Box<dyn RpcSession>,
    },
    /// Teardown of `link` is in flight
    Closing { link: u64 },
}

/// Owns the single Discord session and its retry timer
pub(crate) struct LinkManager {
    connector: Arc<dyn RpcConnector>,
    state: LinkState,
    /// Armed exactly while the state is `Disconnected` or `Connecting`
    retry: Option<Interval>,
    retry_period: Duration,
    next_id: u64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl LinkManager {
    pub(crate) fn new(
        connector: Arc<dyn RpcConnector>,
        retry_period: Duration,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            connector,
            state: LinkState::Disconnected,
            retry: None,
            retry_period,
            next_id: 0,
            completions,
        }
    }

    /// First login attempt right away, then one per retry period until connected
    pub(crate) fn start(&mut self) {
        self.retry = Some(every(self.retry_period));
        self.initiate();
    }

    pub(crate) fn retry_timer(&mut self) -> Option<&mut Interval> {
        self.retry.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &LinkState {
        &self.state
    }

    /// The live session, if logged in
    pub(crate) fn session(&self) -> Option<&dyn RpcSession> {
        match &self.state {
            LinkState::Connected { session, .. } => Some(session.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn on_retry_tick(&mut self) {
        match self.state {
            LinkState::Disconnected => self.initiate(),
            LinkState::Connecting { attempt } => {
                debug!("Discord login attempt {} still pending, skipping retry", attempt);
            }
            LinkState::Connected { .. } | LinkState::Closing { .. } => {
                // Timer is disarmed in these states; a stray tick means nothing
            }
        }
    }

    fn initiate(&mut self) {
        self.next_id += 1;
        let attempt = self.next_id;
        self.state = LinkState::Connecting { attempt };

        let connector = self.connector.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = connector.login().await;
            let _ = completions.send(Completion::Login { attempt, result });
        });
    }

    /// Apply the outcome of a login attempt
    pub(crate) fn on_login(&mut self, attempt: u64, result: Result<RpcLink>) -> Option<BridgeEvent> {
        let current = matches!(self.state, LinkState::Connecting { attempt: a } if a == attempt);

        match result {
            Ok(RpcLink { session, closed }) if current => {
                self.retry = None;

                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let _ = closed.await;
                    let _ = completions.send(Completion::LinkClosed { link: attempt });
                });

                self.state = LinkState::Connected {
                    link: attempt,
                    session,
                };
                Some(BridgeEvent::RpcConnected)
            }
            Err(e) if current => {
                error!("Error on RPC login: {:#}", e);
                warn!(
                    "Connection to Discord has failed. Trying again in {} seconds...",
                    self.retry_period.as_secs()
                );
                self.state = LinkState::Disconnected;
                None
            }
            Ok(RpcLink { session, .. }) => {
                warn!("Discarding session from stale login attempt {}", attempt);
                tokio::spawn(async move {
                    if let Err(e) = session.destroy().await {
                        error!("Failed to destroy stale RPC session: {:#}", e);
                    }
                });
                None
            }
            Err(e) => {
                debug!("Ignoring failure of stale login attempt {}: {:#}", attempt, e);
                None
            }
        }
    }

    /// Apply a transport closure. Tears the handle down and re-arms the retry timer.
    pub(crate) async fn on_closed(&mut self, link: u64) -> Option<BridgeEvent> {
        let current = match self.state {
            LinkState::Connected { link: l, .. } | LinkState::Closing { link: l } => l == link,
            LinkState::Disconnected | LinkState::Connecting { .. } => false,
        };
        if !current {
            debug!("Ignoring closure of stale link {}", link);
            return None;
        }

        if let Err(e) = self.destroy().await {
            error!("Failed to destroy RPC: {:#}", e);
        }
        self.state = LinkState::Disconnected;

        error!(
            "Connection to Discord client was closed. Trying again in {} seconds...",
            self.retry_period.as_secs()
        );
        self.retry = Some(every(self.retry_period));
        Some(BridgeEvent::RpcDisconnected)
    }

    /// Start tearing the session down without waiting for it.
    ///
    /// Completion is reported as a closure of the link, which brings the
    /// usual disconnect handling and retry with it. No-op without a session.
    pub(crate) fn begin_teardown(&mut self) {
        let LinkState::Connected { link, .. } = self.state else {
            return;
        };

        let LinkState::Connected { session, .. } =
            std::mem::replace(&mut self.state, LinkState::Closing { link })
        else {
            return;
        };

        info!("Relinking to Discord to clear presence");
        let completions = self.completions.clone();
        tokio::spawn(async move {
            if let Err(e) = session.destroy().await {
                error!("Failed to destroy RPC: {:#}", e);
            }
            let _ = completions.send(Completion::LinkClosed { link });
        });
    }

    /// Destroy the live session and wait for it to go away.
    ///
    /// Idempotent: returns immediately when there is no session.
    pub(crate) async fn destroy(&mut self) -> Result<()> {
        let LinkState::Connected { link, .. } = self.state else {
            return Ok(());
        };

        let LinkState::Connected { session, .. } =
            std::mem::replace(&mut self.state, LinkState::Closing { link })
        else {
            return Ok(());
        };

        session.destroy().await
    }
}
