//! Progress listeners for the command line: a log line per milestone and a progress bar.

use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use tokio::sync::watch;
use tracing::{info, trace};

use crate::{
    download::Job,
    progress::{ProgressEvent, ProgressListener, throughput},
    util::format_bytes,
};

const PB_STYLE: &str = "{msg} {spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Unsized stages only report when they finish, so there is no byte count to show
const SPINNER_STYLE: &str = "{msg} {spinner:.blue} [{elapsed_precise}]";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

static PB_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    ProgressStyle::with_template(PB_STYLE)
        .ok()
        .map(|style| style.tick_chars(TICK).progress_chars(PB_CHARS))
});

static SPINNER_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    ProgressStyle::with_template(SPINNER_STYLE)
        .ok()
        .map(|style| style.tick_chars(TICK))
});

fn map_name(jobs: &watch::Receiver<Option<Job>>) -> String {
    jobs.borrow()
        .as_ref()
        .map(|job| job.map.name().to_string())
        .unwrap_or_default()
}

/// `Downloading dm_lockdown @ 1.2 MiB/s (3.5 MiB/12.0 MiB)`
pub fn status_text(
    stage: &str,
    map: &str,
    bytes: u64,
    total: Option<u64>,
    elapsed: Duration,
) -> String {
    let speed = format_bytes(throughput(bytes, elapsed));
    match total {
        Some(total) => format!(
            "{stage} {map} @ {speed}/s ({}/{})",
            format_bytes(bytes),
            format_bytes(total)
        ),
        None => format!("{stage} {map} @ {speed}/s ({})", format_bytes(bytes)),
    }
}

struct LineState {
    started: Instant,
    total: Option<u64>,
}

/// Logs a stage's progress, at info level every 25%
pub struct StatusLine {
    stage: &'static str,
    jobs: watch::Receiver<Option<Job>>,
    state: Mutex<Option<LineState>>,
}

impl StatusLine {
    pub fn new(stage: &'static str, jobs: watch::Receiver<Option<Job>>) -> Self {
        Self {
            stage,
            jobs,
            state: Mutex::new(None),
        }
    }
}

impl ProgressListener for StatusLine {
    fn on_event(&self, event: &ProgressEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *event {
            ProgressEvent::Started { total } => {
                *state = Some(LineState {
                    started: Instant::now(),
                    total,
                });
                let size = total.map(format_bytes).unwrap_or_else(|| "unknown size".into());
                info!("{} {} ({size})", self.stage, map_name(&self.jobs));
            }
            ProgressEvent::Updated { percent, bytes } => {
                let Some(line) = state.as_ref() else {
                    return;
                };
                let text = status_text(
                    self.stage,
                    &map_name(&self.jobs),
                    bytes,
                    line.total,
                    line.started.elapsed(),
                );
                if percent % 25 == 0 {
                    info!(percent, "{text}");
                } else {
                    trace!(percent, "{text}");
                }
            }
            ProgressEvent::Finished => {
                *state = None;
            }
        }
    }
}

/// Draws an indicatif progress bar for each stage run
pub struct TerminalProgress {
    stage: &'static str,
    jobs: watch::Receiver<Option<Job>>,
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new(stage: &'static str, jobs: watch::Receiver<Option<Job>>) -> Self {
        Self {
            stage,
            jobs,
            bar: Mutex::new(None),
        }
    }
}

impl ProgressListener for TerminalProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        match *event {
            ProgressEvent::Started { total } => {
                let pb = match total {
                    Some(total) => {
                        let pb = ProgressBar::new(total);
                        if let Some(style) = PB_TEMPLATE.as_ref() {
                            pb.set_style(style.clone());
                        }
                        pb
                    }
                    None => {
                        let pb = ProgressBar::new_spinner();
                        if let Some(style) = SPINNER_TEMPLATE.as_ref() {
                            pb.set_style(style.clone());
                        }
                        pb.enable_steady_tick(Duration::from_millis(120));
                        pb
                    }
                };
                pb.set_message(format!("{} {}", self.stage, map_name(&self.jobs)));
                if let Some(previous) = bar.replace(pb) {
                    previous.finish_and_clear();
                }
            }
            ProgressEvent::Updated { bytes, .. } => {
                if let Some(pb) = bar.as_ref() {
                    pb.set_position(bytes);
                }
            }
            ProgressEvent::Finished => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::testing::{map, source};
    use ulid::Ulid;

    #[test]
    fn test_status_text() {
        assert_eq!(
            status_text(
                "Downloading",
                "dm_lockdown",
                2048,
                Some(4096),
                Duration::from_secs(2),
            ),
            "Downloading dm_lockdown @ 1.0 KiB/s (2.0 KiB/4.0 KiB)"
        );
        // 1.5s counts as 2 whole seconds
        assert_eq!(
            status_text(
                "Decompressing",
                "cp_orange",
                3072,
                Some(4096),
                Duration::from_millis(1500),
            ),
            "Decompressing cp_orange @ 1.5 KiB/s (3.0 KiB/4.0 KiB)"
        );
        assert_eq!(
            status_text("Downloading", "dm_x", 10, None, Duration::ZERO),
            "Downloading dm_x @ 0 B/s (10 B)"
        );
    }

    #[test]
    fn test_listeners_follow_a_run() {
        let source = source("A", 0);
        let job = Job::new(Ulid::new(), map("dm_x", &source), "dm_x.bsp".into());
        let (_tx, jobs) = watch::channel(Some(job));
        assert_eq!(map_name(&jobs), "dm_x");

        let line = StatusLine::new("Downloading", jobs.clone());
        let bar = TerminalProgress::new("Downloading", jobs);
        for event in [
            ProgressEvent::Started { total: Some(100) },
            ProgressEvent::Updated {
                percent: 25,
                bytes: 25,
            },
            ProgressEvent::Updated {
                percent: 26,
                bytes: 26,
            },
            ProgressEvent::Finished,
        ] {
            line.on_event(&event);
            bar.on_event(&event);
        }

        assert!(line.state.lock().unwrap().is_none());
        assert!(bar.bar.lock().unwrap().is_none());
    }
}
