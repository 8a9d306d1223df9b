//! Download queue management
//!
//! The queue runs at most one map job at a time. Maps submitted while a job is active
//! wait in submission order, and the next one starts as soon as the active job reaches
//! a terminal state, whether it succeeded, failed or was cancelled.
//!
//! Observers get the active job through a [`watch`] channel of [`Job`] snapshots, and
//! per-stage progress through the [`ProgressListener`]s registered on the builder.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tempfile::TempPath;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use ulid::Ulid;

use super::{
    Decompressor, Downloader, PipelineError,
    models::{Job, JobFailure, JobState, QueueStats},
};
use crate::{
    maps::Map,
    progress::{ProgressEvent, ProgressListener, ProgressSource},
    util::{move_file, remove_partial},
};

/// Directories the queue works in
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Where finished maps are installed
    pub maps_dir: PathBuf,
    /// Where transfers are staged before they are moved or decompressed into place
    pub temp_dir: PathBuf,
}

pub struct DownloadQueueBuilder {
    downloader: Downloader,
    decompressor: Decompressor,
    settings: QueueSettings,
    download_progress: ProgressSource,
    decompress_progress: ProgressSource,
    job_tx: Arc<watch::Sender<Option<Job>>>,
}

impl DownloadQueueBuilder {
    /// Add a listener for the transfer stage of every job
    pub fn download_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.download_progress.attach(listener);
        self
    }

    /// Add a listener for the decode stage of compressed maps
    pub fn decompress_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.decompress_progress.attach(listener);
        self
    }

    /// Job snapshots, for listeners that need to know which map they are reporting on
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.job_tx.subscribe()
    }

    pub fn build(self) -> DownloadQueue {
        let (idle_tx, _) = watch::channel(true);
        DownloadQueue {
            inner: Arc::new(QueueInner {
                downloader: self.downloader,
                decompressor: self.decompressor,
                settings: self.settings,
                download_progress: self.download_progress,
                decompress_progress: self.decompress_progress,
                state: Mutex::new(QueueState::default()),
                job_tx: self.job_tx,
                idle_tx,
            }),
        }
    }
}

/// Single-flight FIFO queue of map jobs.
///
/// Cloning gives another handle to the same queue. Jobs run on the tokio runtime, so
/// [`DownloadQueue::submit`] must be called from within one.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    downloader: Downloader,
    decompressor: Decompressor,
    settings: QueueSettings,
    download_progress: ProgressSource,
    decompress_progress: ProgressSource,
    state: Mutex<QueueState>,
    job_tx: Arc<watch::Sender<Option<Job>>>,
    idle_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueState {
    active: Option<ActiveJob>,
    pending: VecDeque<Map>,
    last_error: Option<JobFailure>,
    stats: QueueStats,
}

struct ActiveJob {
    id: Ulid,
    map: Map,
    cancel: CancellationToken,
}

impl DownloadQueue {
    pub fn builder(downloader: Downloader, settings: QueueSettings) -> DownloadQueueBuilder {
        let (job_tx, _) = watch::channel(None);
        DownloadQueueBuilder {
            downloader,
            decompressor: Decompressor::new(),
            settings,
            download_progress: ProgressSource::new(),
            decompress_progress: ProgressSource::new(),
            job_tx: Arc::new(job_tx),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Where `map` ends up once installed
    pub fn target_path(&self, map: &Map) -> PathBuf {
        self.inner.target_path(map)
    }

    /// Start downloading `map`, or queue it behind the active job.
    pub fn submit(&self, map: Map) {
        let mut state = self.inner.lock_state();
        if state.active.is_some() {
            debug!(map = %map, "Map download queued");
            state.pending.push_back(map);
            info!(pending = state.pending.len(), "Download queue length");
        } else {
            self.inner.start(&mut state, map);
        }
    }

    /// Cancel the active job. Returns `false` if there was none.
    ///
    /// The job ends in [`JobState::Cancelled`] shortly after, and the next queued map
    /// starts.
    pub fn cancel_active(&self) -> bool {
        let state = self.inner.lock_state();
        match &state.active {
            Some(active) => {
                info!(id = %active.id, map = %active.map, "Cancelling map download");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every queued map, leaving the active job alone. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.inner.lock_state();
        let cleared = state.pending.len();
        state.pending.clear();
        if cleared > 0 {
            info!(cleared, "Cleared download queue");
        }
        cleared
    }

    /// Maps waiting to start, in the order they will start
    pub fn pending(&self) -> Vec<Map> {
        self.inner.lock_state().pending.iter().cloned().collect()
    }

    pub fn active_map(&self) -> Option<Map> {
        self.inner
            .lock_state()
            .active
            .as_ref()
            .map(|active| active.map.clone())
    }

    /// No job is running and nothing is queued
    pub fn is_idle(&self) -> bool {
        *self.inner.idle_tx.borrow()
    }

    /// Snapshots of the active job. After the queue drains, the last job's terminal
    /// snapshot stays in the channel.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.inner.job_tx.subscribe()
    }

    pub fn current_job(&self) -> Option<Job> {
        self.inner.job_tx.borrow().clone()
    }

    /// The most recent failed job, if any
    pub fn last_error(&self) -> Option<JobFailure> {
        self.inner.lock_state().last_error.clone()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock_state().stats
    }

    /// Wait until the active job and everything queued behind it have finished
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once idle
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target_path(&self, map: &Map) -> PathBuf {
        self.settings.maps_dir.join(map.file_name())
    }

    /// Make `map` the active job. The caller holds the state lock.
    fn start(self: &Arc<Self>, state: &mut QueueState, map: Map) {
        let id = Ulid::new();
        let cancel = CancellationToken::new();
        info!(id = %id, map = %map, source = %map.source(), "Starting map download");

        state.active = Some(ActiveJob {
            id,
            map: map.clone(),
            cancel: cancel.clone(),
        });
        self.job_tx
            .send_replace(Some(Job::new(id, map.clone(), self.target_path(&map))));
        self.idle_tx.send_replace(false);

        let inner = Arc::clone(self);
        let span = info_span!("map_job", id = %id, map = %map);
        tokio::spawn(
            async move {
                let outcome = inner.run_job(&map, &cancel).await;
                inner.complete(id, map, outcome);
            }
            .instrument(span),
        );
    }

    /// Record the outcome of the active job and start the next queued map
    fn complete(self: &Arc<Self>, id: Ulid, map: Map, outcome: Result<(), PipelineError>) {
        let mut state = self.lock_state();
        if state.active.as_ref().is_some_and(|active| active.id == id) {
            state.active = None;
        }

        state.stats.record(&terminal_state(&outcome));
        match outcome {
            Ok(()) | Err(PipelineError::Cancelled) => {}
            Err(error) => {
                state.last_error = Some(JobFailure {
                    job_id: id,
                    map,
                    error: Arc::new(error),
                });
            }
        }

        match state.pending.pop_front() {
            Some(next) => self.start(&mut state, next),
            None => {
                debug!("Download queue drained");
                self.idle_tx.send_replace(true);
            }
        }
    }

    async fn run_job(&self, map: &Map, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let target = self.target_path(map);
        let result = self.execute(map, &target, cancel).await;

        match &result {
            Ok(()) => info!(path = ?target, "Map installed"),
            Err(PipelineError::Cancelled) => info!("Map download cancelled"),
            Err(e) => error!(error = %e, "Map download failed"),
        }
        let state = terminal_state(&result);
        self.update_job(|job| job.state = state);
        result
    }

    async fn execute(
        &self,
        map: &Map,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        // Failures from here on leave Downloading, never Queued
        self.update_job(|job| job.state = JobState::Downloading);
        self.prepare_dirs().await?;

        let temp = tempfile::Builder::new()
            .prefix(&format!("{}.", map.name()))
            .suffix(".bsp.tmp")
            .tempfile_in(&self.settings.temp_dir)
            .map_err(|e| PipelineError::filesystem(&self.settings.temp_dir, e))?
            .into_temp_path();
        debug!(temp = ?temp, "Created temp file");

        let temp_path = temp.to_path_buf();
        self.update_job(|job| job.temp_path = Some(temp_path));

        match self.transfer(map, target, &temp, cancel).await {
            Ok(()) => self.finalize(map, target, temp, cancel).await,
            Err(e) => {
                discard_temp(temp);
                Err(e)
            }
        }
    }

    async fn prepare_dirs(&self) -> Result<(), PipelineError> {
        for dir in [&self.settings.maps_dir, &self.settings.temp_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PipelineError::Configuration(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Download into the temp file, then decompress into the target if needed
    async fn transfer(
        &self,
        map: &Map,
        target: &Path,
        temp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let progress = self.download_progress.with_listener(self.job_tracker());
        let downloaded = self
            .downloader
            .download(map.remote_path(), temp, &progress, cancel)
            .await?;
        // Updates are percent based, so an unsized body never reports its bytes
        self.update_job(|job| job.bytes_done = downloaded);

        if map.is_compressed() {
            self.update_job(|job| job.state = JobState::Decoding);
            let progress = self.decompress_progress.with_listener(self.job_tracker());
            let decoded = self
                .decompressor
                .decompress(temp, target, &progress, cancel)
                .await?;
            self.update_job(|job| job.bytes_done = decoded);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        map: &Map,
        target: &Path,
        temp: TempPath,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.update_job(|job| job.state = JobState::Finalizing);

        if cancel.is_cancelled() {
            if map.is_compressed() {
                remove_partial(target).await;
            }
            discard_temp(temp);
            return Err(PipelineError::Cancelled);
        }

        if map.is_compressed() {
            // The decoder already deleted its input
            discard_temp(temp);
            return Ok(());
        }

        match temp.persist(target) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(error = %e.error, "Rename into maps directory failed, copying");
                let temp = e.path;
                let result = move_file(&temp, target)
                    .await
                    .map_err(|e| PipelineError::filesystem(target, e));
                if result.is_err() {
                    remove_partial(target).await;
                }
                discard_temp(temp);
                result
            }
        }
    }

    /// Mirrors stage progress into the job snapshot
    fn job_tracker(&self) -> impl ProgressListener + 'static {
        let job_tx = Arc::clone(&self.job_tx);
        move |event: &ProgressEvent| match *event {
            ProgressEvent::Started { total } => job_tx.send_modify(|job| {
                if let Some(job) = job {
                    job.bytes_total = total;
                    job.bytes_done = 0;
                }
            }),
            ProgressEvent::Updated { bytes, .. } => job_tx.send_modify(|job| {
                if let Some(job) = job {
                    job.bytes_done = bytes;
                }
            }),
            ProgressEvent::Finished => {}
        }
    }

    fn update_job(&self, update: impl FnOnce(&mut Job)) {
        self.job_tx.send_modify(|job| {
            if let Some(job) = job {
                update(job);
            }
        });
    }
}

fn terminal_state(outcome: &Result<(), PipelineError>) -> JobState {
    match outcome {
        Ok(()) => JobState::Done,
        Err(PipelineError::Cancelled) => JobState::Cancelled,
        Err(e) => JobState::Failed(e.to_string()),
    }
}

fn discard_temp(temp: TempPath) {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to delete temp file");
        }
    }
}
