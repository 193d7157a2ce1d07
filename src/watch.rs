//! Recursive source-file watching with debounce.
//!
//! The OS watcher feeds raw events into a channel; a small task owns the
//! debounce state and turns settled bursts into [`Trigger`]s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::{is_excluded, WatchConfig};
use crate::error::{CovwatchError, Result};
use crate::pipeline::Trigger;

/// Buffered triggers before the debounce task waits on the consumer.
const TRIGGER_BUFFER: usize = 16;

/// Kind of source change that can start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Renamed,
}

impl ChangeKind {
    /// Map a notify event kind. Deletions, access and metadata-only
    /// changes (permissions, timestamps) do not start runs.
    #[must_use]
    pub fn from_event_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => None,
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(Self::Modified),
            _ => None,
        }
    }
}

/// A qualifying change to a watched source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: Instant,
}

/// Debounce state: when the last event was accepted and the trigger that is
/// waiting for its settle delay.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    settle: Duration,
    last_accepted_at: Option<Instant>,
    pending: Option<(Instant, ChangeEvent)>,
}

impl Debouncer {
    pub fn new(window: Duration, settle: Duration) -> Self {
        Self {
            window,
            settle,
            last_accepted_at: None,
            pending: None,
        }
    }

    /// Offer an event. Returns whether it was accepted as the start of a new
    /// trigger.
    ///
    /// An event inside the window of the last accepted one is dropped, but
    /// its metadata replaces that of the trigger still settling, so the
    /// trigger carries the most recent change of the burst.
    pub fn offer(&mut self, event: ChangeEvent) -> bool {
        let now = event.observed_at;
        let within_window = self
            .last_accepted_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.window);

        if within_window {
            if let Some((_, pending)) = self.pending.as_mut() {
                *pending = event;
            }
            return false;
        }

        self.last_accepted_at = Some(now);
        self.pending = Some((now + self.settle, event));
        true
    }

    /// When the settling trigger is due, if there is one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(due, _)| *due)
    }

    /// Take the settling trigger's event if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<ChangeEvent> {
        if self.deadline().is_some_and(|due| due <= now) {
            self.pending.take().map(|(_, event)| event)
        } else {
            None
        }
    }
}

/// Spawn the debounce task over a stream of raw change events.
///
/// The returned receiver yields one [`Trigger::Change`] per settled burst and
/// closes once `events` closes.
pub fn debounce(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    window: Duration,
    settle: Duration,
) -> (mpsc::Receiver<Trigger>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(TRIGGER_BUFFER);
    let task = tokio::spawn(async move {
        let mut debouncer = Debouncer::new(window, settle);
        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                biased;
                () = wait_until(deadline) => {
                    if let Some(event) = debouncer.take_due(Instant::now()) {
                        debug!(path = %event.path.display(), kind = ?event.kind, "Change settled");
                        if tx.send(Trigger::Change(event)).await.is_err() {
                            break;
                        }
                    }
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if !debouncer.offer(event) {
                            debug!("Change coalesced into pending trigger");
                        }
                    }
                    None => break,
                },
            }
        }
    });
    (rx, task)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Watches a directory tree for source changes.
#[derive(Debug, Clone)]
pub struct FileChangeMonitor {
    config: WatchConfig,
}

impl FileChangeMonitor {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    /// Start watching `root` recursively. Must be called inside a tokio
    /// runtime.
    ///
    /// A missing root or a watcher that cannot be created is fatal; errors
    /// reported by the watcher afterwards are logged and monitoring goes on.
    pub fn start(&self, root: &Path) -> Result<MonitorHandle> {
        if !root.is_dir() {
            return Err(CovwatchError::WatchRootMissing(root.display().to_string()));
        }
        let root = root.canonicalize()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let filter = EventFilter {
            root: root.clone(),
            extension: self.config.extension.clone(),
            excluded_segments: self.config.excluded_segments.clone(),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in filter.changes(&event) {
                        if events_tx.send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (triggers, task) = debounce(events_rx, self.config.debounce, self.config.settle);
        info!(
            root = %root.display(),
            extension = %self.config.extension,
            "Watching for changes"
        );

        Ok(MonitorHandle {
            watcher: Some(watcher),
            triggers,
            task: Some(task),
        })
    }
}

/// Decides which raw notifications are source changes worth reacting to.
#[derive(Debug, Clone)]
struct EventFilter {
    root: PathBuf,
    extension: String,
    excluded_segments: Vec<String>,
}

impl EventFilter {
    fn changes(&self, event: &Event) -> Vec<ChangeEvent> {
        let Some(kind) = ChangeKind::from_event_kind(&event.kind) else {
            return Vec::new();
        };
        // A paired rename reports [from, to]; only the new name matters.
        let paths: &[PathBuf] = match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.last().map(std::slice::from_ref).unwrap_or_default()
            }
            _ => &event.paths,
        };
        let observed_at = Instant::now();
        paths
            .iter()
            .filter(|path| self.qualifies(path))
            .map(|path| ChangeEvent {
                path: path.clone(),
                kind,
                observed_at,
            })
            .collect()
    }

    fn qualifies(&self, path: &Path) -> bool {
        let matches_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
        matches_extension && !is_excluded(path, &self.root, &self.excluded_segments)
    }
}

/// A running monitor. Dropping it stops monitoring.
#[derive(Debug)]
pub struct MonitorHandle {
    watcher: Option<RecommendedWatcher>,
    triggers: mpsc::Receiver<Trigger>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// The next settled trigger, or `None` once monitoring has stopped.
    pub async fn next_trigger(&mut self) -> Option<Trigger> {
        self.triggers.recv().await
    }

    /// Stop watching. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("Stopped watching for changes");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.triggers.close();
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
