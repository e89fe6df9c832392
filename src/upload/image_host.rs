//! Snapshot upload to a Chevereto-style image host (imgcdn.dev by default)

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{make_thumbnail, SnapshotError, SnapshotPipeline};
use crate::media::MediaSource;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body of `POST /api/1/upload/`
#[derive(Debug, Deserialize)]
struct UploadResponse {
    image: Option<UploadedImage>,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    url: String,
}

/// Fetches MPC's current frame, thumbnails it and publishes it
pub struct ImageHostPipeline {
    media: Arc<dyn MediaSource>,
    client: Client,
    endpoint: String,
    api_key: String,
    max_edge: u32,
}

impl ImageHostPipeline {
    pub fn new(
        media: Arc<dyn MediaSource>,
        client: Client,
        endpoint: String,
        api_key: String,
        max_edge: u32,
    ) -> Self {
        Self {
            media,
            client,
            endpoint,
            api_key,
            max_edge,
        }
    }

    async fn upload(&self, thumbnail: Vec<u8>) -> Result<String, SnapshotError> {
        let part = Part::bytes(thumbnail)
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("source", part);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SnapshotError::UploadStatus(response.status().as_u16()));
        }

        let body: UploadResponse = response.json().await?;
        body.image.map(|i| i.url).ok_or(SnapshotError::MissingUrl)
    }
}

#[async_trait]
impl SnapshotPipeline for ImageHostPipeline {
    async fn refresh(&self) -> Result<String, SnapshotError> {
        info!("Uploading snapshot");

        let frame = self.media.fetch_snapshot().await?;

        // Decoding and resizing is CPU-bound; keep it off the runtime threads
        let max_edge = self.max_edge;
        let thumbnail =
            tokio::task::spawn_blocking(move || make_thumbnail(&frame, max_edge)).await??;
        debug!("Thumbnail size {:.1} kB", thumbnail.len() as f64 / 1024.0);

        let url = self.upload(thumbnail).await?;
        info!("Uploaded snapshot successfully {}", url);
        Ok(url)
    }
}
