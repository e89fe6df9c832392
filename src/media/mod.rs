//! Media Player Classic web interface access
//!
//! The bridge only needs two things from the player: the status page it
//! polls for playback state, and the current frame for snapshot uploads.

mod client;

pub use client::HttpMediaSource;

use async_trait::async_trait;
use thiserror::Error;

/// One successful poll of `variables.html`.
///
/// The body is opaque to the bridge and handed to the presence updater
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStatus {
    /// `Server` response header, e.g. `MPC-HC WebServer`
    pub server: Option<String>,
    /// Raw HTML body
    pub body: String,
}

/// Why a poll did not produce a [`MediaStatus`]
#[derive(Debug, Error)]
pub enum PollError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Source of playback status and frames
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Human-readable endpoint for log messages
    fn endpoint(&self) -> String;

    /// Fetch the status page once
    async fn poll_status(&self) -> Result<MediaStatus, PollError>;

    /// Fetch the current frame as encoded image bytes
    async fn fetch_snapshot(&self) -> Result<Vec<u8>, PollError>;
}
