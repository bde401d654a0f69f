//! File-change monitoring: recursive directory watch, event classification,
//! pattern filtering and the hand-off into the async consumer loop.
//!
//! The `notify` watcher runs its callbacks on a separate observer thread;
//! the only cross-thread interaction is the channel send and the
//! mutex-guarded per-path event history. A single consumer drains the queue
//! sequentially, so no two sync operations ever run concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::bridge::SyncBridge;
use crate::client::RemoteApi;
use crate::config::SyncMapping;
use crate::error::SyncResult;
use crate::filters::PatternSet;

/// Classification of a filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub paths: Vec<PathBuf>,
    pub file_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl MonitorConfig {
    /// Watch every mapping's directory, filtering with the union of their
    /// pattern sets so no mapping's files slip past the monitor.
    pub fn for_mappings(mappings: &[SyncMapping]) -> Self {
        let mut file_patterns: Vec<String> = Vec::new();
        let mut ignore_patterns: Vec<String> = Vec::new();
        for mapping in mappings {
            for pattern in &mapping.file_patterns {
                if !file_patterns.contains(pattern) {
                    file_patterns.push(pattern.clone());
                }
            }
            for pattern in &mapping.ignore_patterns {
                if !ignore_patterns.contains(pattern) {
                    ignore_patterns.push(pattern.clone());
                }
            }
        }
        MonitorConfig {
            paths: mappings.iter().map(|m| m.source_path.clone()).collect(),
            file_patterns,
            ignore_patterns,
        }
    }
}

/// Per-path event timestamps, pruned to the last hour. Statistics only:
/// repeated events are still forwarded individually, never coalesced.
#[derive(Debug, Default)]
struct EventHistory {
    by_path: HashMap<PathBuf, Vec<DateTime<Utc>>>,
}

impl EventHistory {
    fn record(&mut self, path: &Path, at: DateTime<Utc>) {
        let cutoff = at - Duration::hours(1);
        let entries = self.by_path.entry(path.to_path_buf()).or_default();
        entries.push(at);
        entries.retain(|t| *t > cutoff);
    }

    fn recent_count(&self, path: &Path, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(1);
        self.by_path
            .get(path)
            .map(|entries| entries.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }
}

/// Watches directories recursively and enqueues classified change events.
pub struct FileMonitor {
    config: MonitorConfig,
    tx: UnboundedSender<ChangeEvent>,
    watcher: Option<RecommendedWatcher>,
    history: Arc<Mutex<EventHistory>>,
}

impl FileMonitor {
    pub fn new(config: MonitorConfig) -> (Self, UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            FileMonitor {
                config,
                tx,
                watcher: None,
                history: Arc::new(Mutex::new(EventHistory::default())),
            },
            rx,
        )
    }

    /// Start watching. The watcher callback runs on the observer thread:
    /// classify, filter, enqueue — everything else happens on the consumer.
    pub fn start(&mut self) -> SyncResult<()> {
        let patterns = Arc::new(PatternSet::compile(
            &self.config.file_patterns,
            &self.config.ignore_patterns,
        )?);
        let roots = self.config.paths.clone();
        let tx = self.tx.clone();
        let history = Arc::clone(&self.history);

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        error!(error = %e, "watch error");
                        return;
                    }
                };
                let Some(kind) = classify(&event.kind) else {
                    return;
                };
                for path in &event.paths {
                    if !allows_path(&patterns, &roots, path) {
                        continue;
                    }
                    if let Ok(mut history) = history.lock() {
                        history.record(path, Utc::now());
                    }
                    debug!(path = %path.display(), ?kind, "change event enqueued");
                    if tx
                        .send(ChangeEvent {
                            path: path.clone(),
                            kind,
                        })
                        .is_err()
                    {
                        // Consumer gone; the monitor is shutting down.
                        return;
                    }
                }
            })?;

        for path in &self.config.paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
            info!(path = %path.display(), "watching directory");
        }
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop enqueueing new events. In-flight sync operations run to
    /// completion; there is no hard cancellation.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("file monitor stopped");
        }
    }

    /// Events seen for a path within the last hour (burst statistics).
    pub fn recent_event_count(&self, path: &Path) -> usize {
        self.history
            .lock()
            .map(|h| h.recent_count(path, Utc::now()))
            .unwrap_or(0)
    }
}

/// Map a raw notify event kind onto created/modified/deleted.
fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Apply the pattern set to the path relative to its watch root.
fn allows_path(patterns: &PatternSet, roots: &[PathBuf], path: &Path) -> bool {
    let relative = roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .unwrap_or(path);
    patterns.allows(relative)
}

/// Drain the event queue sequentially, syncing the owning mapping for each
/// changed path. One event at a time: strict ordering of processing.
pub async fn run_consumer<C: RemoteApi>(
    mut rx: UnboundedReceiver<ChangeEvent>,
    bridge: &SyncBridge<C>,
) {
    while let Some(event) = rx.recv().await {
        match event.kind {
            ChangeKind::Deleted => {
                // Remote deletion is out of scope; surface it and move on.
                warn!(path = %event.path.display(), "local file deleted, leaving remote untouched");
                continue;
            }
            ChangeKind::Created | ChangeKind::Modified => {
                info!(path = %event.path.display(), kind = ?event.kind, "processing change event");
                match bridge.sync_path(&event.path).await {
                    Ok(Some(report)) => {
                        debug!(target_id = %report.target_id, status = ?report.status, "sync finished")
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(path = %event.path.display(), error = %e, "sync failed for changed path")
                    }
                }
            }
        }
    }
    info!("event queue closed, consumer loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn classify_maps_event_kinds() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any)),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(classify(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn history_prunes_entries_older_than_one_hour() {
        let mut history = EventHistory::default();
        let now = Utc::now();
        let path = Path::new("docs/guide.md");
        history.record(path, now - Duration::minutes(90));
        history.record(path, now - Duration::minutes(10));
        history.record(path, now);
        assert_eq!(history.recent_count(path, now), 2);
    }

    #[test]
    fn history_counts_are_per_path() {
        let mut history = EventHistory::default();
        let now = Utc::now();
        history.record(Path::new("a.md"), now);
        history.record(Path::new("a.md"), now);
        history.record(Path::new("b.md"), now);
        assert_eq!(history.recent_count(Path::new("a.md"), now), 2);
        assert_eq!(history.recent_count(Path::new("b.md"), now), 1);
        assert_eq!(history.recent_count(Path::new("c.md"), now), 0);
    }

    #[test]
    fn monitor_config_unions_patterns_across_mappings() {
        let mut first = SyncMapping::new("/srv/docs", "t1");
        first.file_patterns = vec!["*.md".to_string()];
        first.ignore_patterns = vec![".*".to_string()];
        let mut second = SyncMapping::new("/srv/notes", "t2");
        second.file_patterns = vec!["*.txt".to_string(), "*.md".to_string()];
        second.ignore_patterns = vec!["*.tmp".to_string()];

        let config = MonitorConfig::for_mappings(&[first, second]);
        assert_eq!(
            config.paths,
            vec![PathBuf::from("/srv/docs"), PathBuf::from("/srv/notes")]
        );
        // Union, deduplicated, so the second mapping's files still match.
        assert_eq!(config.file_patterns, vec!["*.md", "*.txt"]);
        assert_eq!(config.ignore_patterns, vec![".*", "*.tmp"]);
    }

    #[test]
    fn pattern_filter_applies_relative_to_watch_root() {
        let patterns = PatternSet::compile(
            &["*.md".to_string()],
            &[".*".to_string()],
        )
        .unwrap();
        let roots = vec![PathBuf::from("/tmp/.work/docs")];
        // The hidden component in the root itself must not trip the ignore.
        assert!(allows_path(
            &patterns,
            &roots,
            Path::new("/tmp/.work/docs/guide.md")
        ));
        assert!(!allows_path(
            &patterns,
            &roots,
            Path::new("/tmp/.work/docs/.hidden.md")
        ));
        assert!(!allows_path(
            &patterns,
            &roots,
            Path::new("/tmp/.work/docs/image.png")
        ));
    }
}
