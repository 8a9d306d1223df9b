//! Bzip2 decode stage

use std::path::Path;

use async_compression::tokio::bufread::BzDecoder;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncWrite, BufReader},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{
    PipelineError,
    stream::{CHUNK_SIZE, CopyError, copy_with_progress},
};
use crate::{
    progress::{ProgressRun, ProgressSource},
    util::remove_partial,
};

/// Inflates bzip2 files.
///
/// Progress is decoded bytes against the compressed input size, clamped to 100%, since
/// the decoded size is not known up front.
#[derive(Debug, Clone, Default)]
pub struct Decompressor;

impl Decompressor {
    pub fn new() -> Self {
        Self
    }

    /// Decompress `input` into `output`, returning the number of decoded bytes.
    ///
    /// On success the input is deleted. On failure or cancellation the partial output is
    /// removed and the input is left for the caller to clean up.
    #[instrument(level = "debug", skip(self, progress, cancel))]
    pub async fn decompress(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSource,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let mut run = progress.begin();
        let result = self.decode_to(input, output, &mut run, cancel).await;
        match &result {
            Ok(bytes) => {
                info!(bytes, path = ?output, "Decompression completed");
                if let Err(e) = tokio::fs::remove_file(input).await {
                    warn!(path = ?input, error = %e, "Failed to delete compressed file");
                }
            }
            Err(_) => remove_partial(output).await,
        }
        run.finish();
        result
    }

    async fn decode_to(
        &self,
        input: &Path,
        output: &Path,
        run: &mut ProgressRun,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let source = File::open(input)
            .await
            .map_err(|e| PipelineError::filesystem(input, e))?;
        let compressed_size = source
            .metadata()
            .await
            .map_err(|e| PipelineError::filesystem(input, e))?
            .len();
        let mut target = File::create(output)
            .await
            .map_err(|e| PipelineError::filesystem(output, e))?;

        let mut decoder = BzDecoder::new(BufReader::with_capacity(CHUNK_SIZE, source));
        inflate(&mut decoder, &mut target, output, compressed_size, run, cancel).await
    }
}

/// Copy decoded bytes into `target`, measuring progress against the compressed size.
async fn inflate<R, W>(
    decoded: &mut R,
    target: &mut W,
    output: &Path,
    compressed_size: u64,
    run: &mut ProgressRun,
    cancel: &CancellationToken,
) -> Result<u64, PipelineError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    run.start(Some(compressed_size));
    copy_with_progress(decoded, target, run, cancel)
        .await
        .map_err(|e| match e {
            CopyError::Read(e) => PipelineError::Decode(e),
            CopyError::Write(e) => PipelineError::filesystem(output, e),
            CopyError::Cancelled => PipelineError::Cancelled,
        })
}
