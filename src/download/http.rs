//! HTTP transfer stage
//!
//! Streams a remote file into a local file in fixed-size chunks, reporting progress and
//! honoring cancellation between chunks.

use std::{io, path::Path};

use futures_util::TryStreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::{debug, info, instrument};

use super::{
    PipelineError,
    stream::{CopyError, copy_with_progress},
};
use crate::{
    progress::{ProgressRun, ProgressSource},
    util::remove_partial,
};

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Download `url` into `destination`, returning the number of bytes written.
    ///
    /// `Finished` is reported to `progress` exactly once however this ends. On failure or
    /// cancellation the partially written destination is removed.
    #[instrument(level = "debug", skip(self, destination, progress, cancel), fields(url = %url))]
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: &ProgressSource,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let mut run = progress.begin();
        let result = self.fetch_to(url, destination, &mut run, cancel).await;
        if result.is_err() {
            remove_partial(destination).await;
        }
        run.finish();
        result
    }

    async fn fetch_to(
        &self,
        url: &str,
        destination: &Path,
        run: &mut ProgressRun,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        let response = response.error_for_status()?;
        let total = response.content_length();
        debug!(status = %response.status(), total = ?total, "Response received");

        let mut file = File::create(destination)
            .await
            .map_err(|e| PipelineError::filesystem(destination, e))?;
        run.start(total);

        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let mut reader = StreamReader::new(body);

        let copied = copy_with_progress(&mut reader, &mut file, run, cancel)
            .await
            .map_err(|e| match e {
                CopyError::Read(e) => PipelineError::Transport(Box::new(e)),
                CopyError::Write(e) => PipelineError::filesystem(destination, e),
                CopyError::Cancelled => PipelineError::Cancelled,
            })?;

        info!(bytes = copied, path = ?destination, "Download completed");
        Ok(copied)
    }
}
