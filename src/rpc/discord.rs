//! Discord Rich Presence transport using discord-sdk

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use discord_sdk::{
    activity::{ActivityBuilder, Assets},
    user::User,
    wheel::{UserSpoke, UserState, Wheel},
    Discord, Subscriptions,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{RpcConnector, RpcLink, RpcSession};
use crate::presence::Activity;

/// Timeout for waiting for Discord handshake.
/// Kept below the login retry interval so attempts never overlap.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);

/// Messages from a [`DiscordSession`] handle to its background task
enum SessionCommand {
    SetActivity(Activity),
    Disconnect(oneshot::Sender<()>),
}

/// Logs in to the local Discord client over IPC
pub struct DiscordConnector {
    app_id: i64,
}

impl DiscordConnector {
    pub fn new(app_id: i64) -> Self {
        Self { app_id }
    }
}

#[async_trait]
impl RpcConnector for DiscordConnector {
    async fn login(&self) -> Result<RpcLink> {
        let (wheel, handler) = Wheel::new(Box::new(|err| {
            warn!("RPC error: {:?}", err);
        }));

        let mut user_spoke = wheel.user();

        let discord = Discord::new(self.app_id, Subscriptions::ACTIVITY, Box::new(handler))
            .map_err(|e| anyhow!("Discord not available: {:?}", e))?;

        debug!("Discord connecting...");

        let user = match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_user(&mut user_spoke)).await {
            Ok(Ok(user)) => user,
            Ok(Err(e)) => {
                discord.disconnect().await;
                return Err(e);
            }
            Err(_) => {
                discord.disconnect().await;
                bail!("Discord handshake timed out");
            }
        };

        info!(
            "Discord Rich Presence connected as {}#{}",
            user.username,
            user.discriminator.unwrap_or(0)
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(run_session(discord, wheel, user_spoke, cmd_rx, closed_tx));

        Ok(RpcLink {
            session: Box::new(DiscordSession { cmd_tx }),
            closed: closed_rx,
        })
    }
}

async fn wait_for_user(user_spoke: &mut UserSpoke) -> Result<User> {
    if user_spoke.0.changed().await.is_err() {
        bail!("Discord connection closed");
    }

    match &*user_spoke.0.borrow() {
        UserState::Connected(user) => Ok(user.clone()),
        UserState::Disconnected(err) => Err(anyhow!("Discord disconnected: {:?}", err)),
    }
}

/// Owns the [`Discord`] client for the lifetime of one session.
///
/// Ends when asked to disconnect, when every handle is dropped, or when the
/// client reports the user as disconnected. `closed_tx` fires in all cases.
async fn run_session(
    discord: Discord,
    _wheel: Wheel,
    mut user_spoke: UserSpoke,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    closed_tx: oneshot::Sender<()>,
) {
    let ack = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::SetActivity(activity)) => {
                    if let Err(e) = discord.update_activity(to_builder(activity)).await {
                        warn!("Failed to update Discord activity: {:?}", e);
                    }
                }
                Some(SessionCommand::Disconnect(ack)) => break Some(ack),
                None => break None,
            },

            changed = user_spoke.0.changed() => {
                let lost = changed.is_err()
                    || matches!(&*user_spoke.0.borrow(), UserState::Disconnected(_));
                if lost {
                    warn!("Discord transport closed");
                    break None;
                }
            }
        }
    };

    discord.disconnect().await;
    debug!("Discord Rich Presence disconnected");

    let _ = closed_tx.send(());
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

fn to_builder(activity: Activity) -> ActivityBuilder {
    let mut assets = Assets::default().large(activity.large_image, activity.large_text);
    if let Some(small) = activity.small_image {
        assets = assets.small(small, activity.small_text);
    }

    let mut builder = ActivityBuilder::new().assets(assets);
    if let Some(details) = activity.details {
        builder = builder.details(details);
    }
    if let Some(state) = activity.state {
        builder = builder.state(state);
    }
    if let Some(start) = activity.start {
        builder = builder.start_timestamp(start);
    }
    if let Some(end) = activity.end {
        builder = builder.end_timestamp(end);
    }
    builder
}

/// Handle to a session task
struct DiscordSession {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

#[async_trait]
impl RpcSession for DiscordSession {
    fn set_activity(&self, activity: Activity) {
        if self.cmd_tx.send(SessionCommand::SetActivity(activity)).is_err() {
            debug!("Discord session already closed, activity dropped");
        }
    }

    async fn destroy(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCommand::Disconnect(ack_tx)).is_err() {
            // Task already exited and disconnected on its own
            return Ok(());
        }
        // A dropped ack means the task was already shutting down on its own
        if ack_rx.await.is_err() {
            debug!("Discord session ended before the disconnect request was seen");
        }
        Ok(())
    }
}
