//! Data structures for the download pipeline
//!
//! This file contains the job snapshot published by the queue and the state a job moves
//! through on its way from the mirror to the maps directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, sync::Arc};
use ulid::Ulid;

use super::PipelineError;
use crate::{maps::Map, progress::percent_of};

/// Stage of a map job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum JobState {
    /// Job has been accepted but no stage has started yet
    #[default]
    Queued,
    /// Transferring the remote file into the temp file
    Downloading,
    /// Decompressing the temp file into the maps directory
    Decoding,
    /// Moving the result into place and cleaning up
    Finalizing,
    /// The map is installed
    Done,
    /// Job was cancelled by user
    Cancelled,
    /// Job failed with an error
    Failed(String),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Decoding => write!(f, "Decompressing"),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Done => write!(f, "Done"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(err) => write!(f, "Failed: {err}"),
        }
    }
}

impl JobState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed(_))
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Snapshot of the job the queue is working on
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Ulid,
    pub map: Map,
    /// Final location in the maps directory
    pub target_path: PathBuf,
    /// Where the remote bytes are staged, once created
    pub temp_path: Option<PathBuf>,
    pub state: JobState,
    /// Size of the current stage's input, if known
    pub bytes_total: Option<u64>,
    /// Bytes processed by the current stage, as of its last reported percentage
    pub bytes_done: u64,
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(id: Ulid, map: Map, target_path: PathBuf) -> Self {
        Self {
            id,
            map,
            target_path,
            temp_path: None,
            state: JobState::Queued,
            bytes_total: None,
            bytes_done: 0,
            started_at: Utc::now(),
        }
    }

    /// Percentage of the current stage, if its size is known
    pub fn percentage(&self) -> Option<u8> {
        percent_of(self.bytes_done, self.bytes_total)
    }
}

/// The most recent job that did not end in `Done` or `Cancelled`
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job_id: Ulid,
    pub map: Map,
    pub error: Arc<PipelineError>,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.map, self.error)
    }
}

/// Counts of finished jobs since the queue was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub(crate) fn record(&mut self, state: &JobState) {
        match state {
            JobState::Done => self.done += 1,
            JobState::Cancelled => self.cancelled += 1,
            JobState::Failed(_) => self.failed += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.done + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::testing::{map, source};

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Downloading.is_terminal());
        assert!(!JobState::Decoding.is_terminal());
        assert!(!JobState::Finalizing.is_terminal());
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Failed("boom".into()).is_terminal());
        assert_eq!(
            JobState::Failed("boom".into()).to_string(),
            "Failed: boom"
        );
    }

    #[test]
    fn test_job_percentage() {
        let source = source("A", 0);
        let mut job = Job::new(Ulid::new(), map("dm_x", &source), "dm_x.bsp".into());
        assert_eq!(job.percentage(), None);

        job.bytes_total = Some(200);
        job.bytes_done = 50;
        assert_eq!(job.percentage(), Some(25));
    }

    #[test]
    fn test_stats() {
        let mut stats = QueueStats::default();
        stats.record(&JobState::Done);
        stats.record(&JobState::Failed("x".into()));
        stats.record(&JobState::Downloading);
        stats.record(&JobState::Cancelled);
        stats.record(&JobState::Done);

        assert_eq!(
            stats,
            QueueStats {
                done: 2,
                failed: 1,
                cancelled: 1
            }
        );
        assert_eq!(stats.total(), 4);
    }
}
