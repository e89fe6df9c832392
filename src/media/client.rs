//! reqwest-backed access to the MPC web interface

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{MediaSource, MediaStatus, PollError};
use crate::config::Config;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to `http://<host>:<port>/` of a running MPC instance
#[derive(Clone)]
pub struct HttpMediaSource {
    client: Client,
    base_url: String,
    poll_timeout: Duration,
}

impl HttpMediaSource {
    /// Create a source for the validated media settings in `config`
    #[cfg(test)]
    pub fn new(config: &Config) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Create a source sharing an existing client
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.media_base_url(),
            poll_timeout: config.timing.poll_timeout(),
        }
    }

    fn status_url(&self) -> String {
        format!("{}/variables.html", self.base_url)
    }

    fn snapshot_url(&self) -> String {
        format!("{}/snapshot.jpg", self.base_url)
    }
}

fn classify(err: reqwest::Error) -> PollError {
    if err.is_timeout() {
        PollError::Timeout
    } else if err.is_connect() {
        PollError::Connect(err.to_string())
    } else {
        PollError::Request(err)
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    fn endpoint(&self) -> String {
        self.status_url()
    }

    async fn poll_status(&self) -> Result<MediaStatus, PollError> {
        let response = self
            .client
            .get(self.status_url())
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let server = response
            .headers()
            .get(header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(classify)?;

        Ok(MediaStatus { server, body })
    }

    async fn fetch_snapshot(&self) -> Result<Vec<u8>, PollError> {
        let response = self
            .client
            .get(self.snapshot_url())
            .timeout(SNAPSHOT_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;

        // Anything but a plain 200 (204 while no file is open, 3xx, ...) is a miss
        if response.status() != StatusCode::OK {
            return Err(PollError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        debug!("Fetched snapshot ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }
}
