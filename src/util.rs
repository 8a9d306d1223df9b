use std::{io, path::Path, time::Duration};

use bytesize::ByteSize;
use tracing::{debug, warn};

/// Move a file, falling back to copy and delete when a rename is not possible
/// (like across filesystems).
pub async fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    debug!(from = ?src, to = ?dest, "Moving file");

    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(src, dest).await?;
    tokio::fs::remove_file(src).await
}

/// Best-effort removal of a file left behind by a failed stage.
///
/// A missing file is fine; any other failure is only logged.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = ?path, "Removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove partial file"),
    }
}

/// Human readable byte count, like `4.2 MiB`
pub fn format_bytes(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

/// Human readable duration, like `1 minute and 5 seconds`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let units = [
        (total / 3600, "hour"),
        (total / 60 % 60, "minute"),
        (total % 60, "second"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, unit)| match count {
            1 => format!("1 {unit}"),
            n => format!("{n} {unit}s"),
        })
        .collect();

    match parts.as_slice() {
        [] => "0 seconds".to_string(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(400)), "0 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(1)), "1 second");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1 minute and 5 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "1 hour");
        assert_eq!(
            format_elapsed(Duration::from_secs(2 * 3600 + 120 + 1)),
            "2 hours, 2 minutes and 1 second"
        );
    }

    #[tokio::test]
    async fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bsp");
        let dest = dir.path().join("nested").join("b.bsp");
        tokio::fs::write(&src, b"map").await.unwrap();

        move_file(&src, &dest).await.unwrap();

        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"map");
    }

    #[tokio::test]
    async fn test_remove_partial_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bsp");
        remove_partial(&path).await;

        tokio::fs::write(&path, b"half").await.unwrap();
        remove_partial(&path).await;
        assert!(!path.exists());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(4 * 1024 * 1024), "4.0 MiB");
        assert_eq!(format_bytes(215), "215 B");
        assert_eq!(format_bytes(0), "0 B");
    }
}
