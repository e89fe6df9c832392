//! Snapshot capture, thumbnailing and upload

mod image_host;
mod thumbnail;

pub use image_host::ImageHostPipeline;
pub use thumbnail::make_thumbnail;

use async_trait::async_trait;
use thiserror::Error;

use crate::media::PollError;

/// Any step of a snapshot cycle that can fail
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to fetch snapshot: {0}")]
    Fetch(#[from] PollError),

    #[error("failed to build thumbnail: {0}")]
    Image(#[from] image::ImageError),

    #[error("thumbnail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("upload failed: {0}")]
    Upload(#[from] reqwest::Error),

    #[error("image host returned HTTP {0}")]
    UploadStatus(u16),

    #[error("image host response has no image url")]
    MissingUrl,
}

/// One capture-transform-upload cycle
#[async_trait]
pub trait SnapshotPipeline: Send + Sync {
    /// Capture the current frame and return the URL it was published at
    async fn refresh(&self) -> Result<String, SnapshotError>;
}
