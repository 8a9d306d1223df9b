//! Progress reporting for the download and decompression stages.
//!
//! A [`ProgressSource`] holds an ordered list of listeners. Every stage run obtains a
//! [`ProgressRun`] from [`ProgressSource::begin`], which fires the events in order and
//! coalesces updates so listeners only hear about whole-percent increases:
//!
//! - [`ProgressEvent::Started`] at most once, before any update
//! - [`ProgressEvent::Updated`] whenever the integer percentage strictly increases
//! - [`ProgressEvent::Finished`] exactly once, on success, failure or cancellation

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tracing::warn;

/// An event emitted by a [`ProgressRun`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The stage learned its size. `None` means the size is unknown, in which case
    /// no [`ProgressEvent::Updated`] events follow.
    Started { total: Option<u64> },
    /// The integer percentage increased (like 80 -> 81)
    Updated { percent: u8, bytes: u64 },
    /// No further events will arrive for this run. This does not mean it succeeded.
    Finished,
}

/// Observer of progress events.
///
/// Any `Fn(&ProgressEvent) + Send + Sync` closure is a listener.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// An ordered list of progress listeners.
///
/// Cloning is cheap; clones share the listener objects but not the list itself.
#[derive(Clone, Default)]
pub struct ProgressSource {
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl fmt::Debug for ProgressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSource")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ProgressSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener to the end of the list
    pub fn attach(&mut self, listener: impl ProgressListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// A copy of this source with one more listener at the end
    pub fn with_listener(&self, listener: impl ProgressListener + 'static) -> Self {
        let mut source = self.clone();
        source.attach(listener);
        source
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Begin a stage run. No event is fired until [`ProgressRun::start`].
    pub fn begin(&self) -> ProgressRun {
        ProgressRun {
            source: self.clone(),
            total: None,
            bytes: 0,
            last_percent: 0,
            started: false,
            finished: false,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        for (index, listener) in self.listeners.iter().enumerate() {
            // A failing listener must not starve the ones after it
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if result.is_err() {
                warn!(listener = index, event = ?event, "Progress listener panicked");
            }
        }
    }
}

/// One stage's lifecycle of progress events.
///
/// `Finished` is fired by [`ProgressRun::finish`], or on drop if the run was never
/// finished explicitly, so every exit path of a stage reports it exactly once.
#[derive(Debug)]
pub struct ProgressRun {
    source: ProgressSource,
    total: Option<u64>,
    bytes: u64,
    last_percent: u8,
    started: bool,
    finished: bool,
}

impl ProgressRun {
    /// Fire `Started`. Later calls are ignored.
    pub fn start(&mut self, total: Option<u64>) {
        if self.started || self.finished {
            return;
        }
        self.started = true;
        self.total = total;
        self.source.emit(ProgressEvent::Started { total });
    }

    /// Record the cumulative byte count, firing `Updated` if the percentage went up.
    pub fn update(&mut self, bytes: u64) {
        if !self.started || self.finished {
            return;
        }
        self.bytes = bytes;

        if let Some(percent) = percent_of(bytes, self.total) {
            if percent > self.last_percent {
                self.last_percent = percent;
                self.source.emit(ProgressEvent::Updated { percent, bytes });
            }
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn finish(mut self) {
        self.fire_finished();
    }

    fn fire_finished(&mut self) {
        if !self.finished {
            self.finished = true;
            self.source.emit(ProgressEvent::Finished);
        }
    }
}

impl Drop for ProgressRun {
    fn drop(&mut self) {
        self.fire_finished();
    }
}

/// Integer percentage of `bytes` against `total`, floored and clamped to 100.
///
/// Returns `None` when the total is unknown or zero.
pub fn percent_of(bytes: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|total| *total > 0)?;
    let percent = (u128::from(bytes) * 100 / u128::from(total)).min(100);
    Some(percent as u8)
}

/// Bytes per second, dividing by the elapsed time rounded up to whole seconds.
pub fn throughput(bytes: u64, elapsed: Duration) -> u64 {
    if bytes == 0 || elapsed.is_zero() {
        return 0;
    }
    let seconds = elapsed.as_millis().div_ceil(1000).max(1);
    (u128::from(bytes) / seconds) as u64
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::{ProgressEvent, ProgressListener};

    /// Listener that records every event it receives
    #[derive(Clone, Default)]
    pub struct RecordingListener {
        events: Arc<Mutex<Vec<ProgressEvent>>>,
    }

    impl RecordingListener {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn percents(&self) -> Vec<u8> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ProgressEvent::Updated { percent, .. } => Some(percent),
                    _ => None,
                })
                .collect()
        }

        pub fn last_bytes(&self) -> Option<u64> {
            self.events().into_iter().rev().find_map(|event| match event {
                ProgressEvent::Updated { bytes, .. } => Some(bytes),
                _ => None,
            })
        }

        pub fn finished_count(&self) -> usize {
            self.events()
                .iter()
                .filter(|event| matches!(event, ProgressEvent::Finished))
                .count()
        }
    }

    impl ProgressListener for RecordingListener {
        fn on_event(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(*event);
        }
    }
}
