//! OS signal handling

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::bridge::BridgeCommand;

/// Forward the first termination signal to the bridge as a shutdown command
pub fn spawn_listener(cmd_tx: mpsc::Sender<BridgeCommand>) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!("{} received, shutting down...", name),
            Err(e) => {
                error!("Failed to install signal handlers: {:#}", e);
                return;
            }
        }
        let _ = cmd_tx.send(BridgeCommand::Shutdown).await;
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = user1.recv() => "SIGUSR1",
        _ = user2.recv() => "SIGUSR2",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
