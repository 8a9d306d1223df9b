//! Module for downloading maps
//!
//! A map job moves through three stages:
//!
//! - transfer, where [`Downloader`] streams the remote file into a temp file
//! - decode, where [`Decompressor`] inflates bzip2 maps into the maps directory
//! - finalize, where the temp file is moved into place or cleaned up
//!
//! [`DownloadQueue`] runs one job at a time and queues the rest in submission order.

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

mod decompress;
mod http;
mod models;
mod queue;
mod stream;

pub use decompress::Decompressor;
pub use http::Downloader;
pub use models::{Job, JobFailure, JobState, QueueStats};
pub use queue::{DownloadQueue, DownloadQueueBuilder, QueueSettings};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Connection, HTTP status or stream read failure
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The compressed data is malformed
    #[error("Decode error: {0}")]
    Decode(#[source] io::Error),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub(crate) fn filesystem(path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}
