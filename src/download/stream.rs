//! Chunked copy shared by the transfer and decode stages

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressRun;

/// Size of each read. Cancellation is checked between reads.
pub const CHUNK_SIZE: usize = 10 * 1024;

#[derive(Debug)]
pub(crate) enum CopyError {
    Read(std::io::Error),
    Write(std::io::Error),
    Cancelled,
}

/// Copy `reader` into `writer` one chunk at a time, reporting the cumulative byte count
/// to `run` after every write.
///
/// A cancellation that arrives while a read is pending interrupts that read.
pub(crate) async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    run: &mut ProgressRun,
    cancel: &CancellationToken,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CopyError::Cancelled),
            read = reader.read(&mut buffer) => read.map_err(CopyError::Read)?,
        };
        if read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..read])
            .await
            .map_err(CopyError::Write)?;
        copied += read as u64;
        run.update(copied);
    }

    writer.flush().await.map_err(CopyError::Write)?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        pin::Pin,
        task::{Context, Poll},
    };

    use futures_util::stream;
    use tokio_util::io::StreamReader;

    use super::*;
    use crate::progress::{ProgressSource, testing::RecordingListener};

    fn chunked(chunks: Vec<Vec<u8>>) -> impl AsyncRead + Unpin {
        StreamReader::new(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, io::Error>(Cursor::new(chunk))),
        ))
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::StorageFull, "disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_copies_everything_and_reports_whole_percents() {
        let recorder = RecordingListener::new();
        let source = ProgressSource::new().with_listener(recorder.clone());
        let mut reader = chunked(vec![vec![1; 500], vec![2; 500]]);
        let mut output = Vec::new();

        let mut run = source.begin();
        run.start(Some(1000));
        let copied = copy_with_progress(&mut reader, &mut output, &mut run, &CancellationToken::new())
            .await
            .unwrap();
        run.finish();

        assert_eq!(copied, 1000);
        assert_eq!(output.len(), 1000);
        assert_eq!(&output[..500], &[1; 500][..]);
        assert_eq!(recorder.percents(), vec![50, 100]);
        assert_eq!(recorder.last_bytes(), Some(1000));
        assert_eq!(recorder.finished_count(), 1);
    }

    #[tokio::test]
    async fn test_large_input_is_read_in_chunks() {
        let recorder = RecordingListener::new();
        let source = ProgressSource::new().with_listener(recorder.clone());
        let data = vec![7u8; CHUNK_SIZE * 4];
        let mut reader = Cursor::new(data.clone());
        let mut output = Vec::new();

        let mut run = source.begin();
        run.start(Some(data.len() as u64));
        copy_with_progress(&mut reader, &mut output, &mut run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output, data);
        assert_eq!(recorder.percents(), vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = chunked(vec![vec![0; 100]]);
        let mut output = Vec::new();
        let mut run = ProgressSource::new().begin();

        let result = copy_with_progress(&mut reader, &mut output, &mut run, &cancel).await;

        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_read_and_write_errors_are_told_apart() {
        let mut failing = StreamReader::new(stream::iter(vec![
            Ok(Cursor::new(vec![0u8; 10])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]));
        let mut output = Vec::new();
        let mut run = ProgressSource::new().begin();
        let result =
            copy_with_progress(&mut failing, &mut output, &mut run, &CancellationToken::new())
                .await;
        assert!(matches!(result, Err(CopyError::Read(e)) if e.kind() == io::ErrorKind::ConnectionReset));
        assert_eq!(output.len(), 10);

        let mut reader = chunked(vec![vec![0; 10]]);
        let mut run = ProgressSource::new().begin();
        let result =
            copy_with_progress(&mut reader, &mut BrokenWriter, &mut run, &CancellationToken::new())
                .await;
        assert!(matches!(result, Err(CopyError::Write(_))));
    }
}
