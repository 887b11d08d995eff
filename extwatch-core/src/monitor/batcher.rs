//! Deduplicating, debounced event batching

use crate::monitor::ignore_rules::IgnoreIndex;
use crate::monitor::{WatcherEvent, WatcherEventKind};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Buffers classified events and hands them to `on_change` once no new
/// event has arrived for the debounce window.
pub struct EventBatcher<F>
where
    F: FnMut(Vec<WatcherEvent>),
{
    debounce: Duration,
    pending: Vec<WatcherEvent>,
    deadline: Option<Instant>,
    ignore_index: IgnoreIndex,
    watch_paths: HashMap<PathBuf, GlobSet>,
    on_change: F,
}

impl<F> EventBatcher<F>
where
    F: FnMut(Vec<WatcherEvent>),
{
    pub fn new(debounce: Duration, ignore_index: IgnoreIndex, on_change: F) -> Self {
        Self {
            debounce,
            pending: Vec::new(),
            deadline: None,
            ignore_index,
            watch_paths: HashMap::new(),
            on_change,
        }
    }

    /// Refresh the ignore rules of `directory` and set its custom watch paths.
    ///
    /// Patterns are relative to `directory`.
    pub fn register_extension(&mut self, directory: &Path, watch_paths: Option<&[String]>) {
        self.ignore_index.refresh(directory);
        match watch_paths {
            Some(patterns) => {
                let globs = compile_watch_paths(directory, patterns);
                self.watch_paths.insert(directory.to_path_buf(), globs);
            }
            None => {
                self.watch_paths.remove(directory);
            }
        }
    }

    /// Queue an event. Returns `false` if it was filtered or already pending.
    pub fn push(&mut self, event: WatcherEvent) -> bool {
        if self.pending.iter().any(|e| e.path == event.path && e.kind == event.kind) {
            trace!("Already pending: {} {:?}", event.kind, event.path);
            return false;
        }

        if let Some(directory) = event.extension_path.as_path() {
            let folder_event = matches!(
                event.kind,
                WatcherEventKind::ExtensionFolderCreated | WatcherEventKind::ExtensionFolderDeleted
            );
            if !folder_event {
                if let Some(globs) = self.watch_paths.get(directory) {
                    if !globs.is_match(&event.path) {
                        debug!("Dropping {:?}: outside the extension's watch paths", event.path);
                        return false;
                    }
                }
            }
            if self.ignore_index.is_ignored(directory, &event.path) {
                debug!("Dropping {:?}: ignored by {:?}", event.path, directory);
                return false;
            }
        }

        self.pending.push(event);
        self.deadline = Some(Instant::now() + self.debounce);
        true
    }

    /// When the next flush is due, if anything is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &[WatcherEvent] {
        &self.pending
    }

    /// Swap out the buffer and deliver it
    pub fn flush(&mut self) {
        self.deadline = None;
        let events = std::mem::take(&mut self.pending);
        if events.is_empty() {
            return;
        }

        let paths: Vec<String> = events.iter().map(|e| e.path.display().to_string()).collect();
        debug!("{} events emitted in files: {}", events.len(), paths.join(", "));
        (self.on_change)(events);
    }

    /// Drop everything pending without delivering it
    pub fn discard(&mut self) -> usize {
        self.deadline = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

impl<F> std::fmt::Debug for EventBatcher<F>
where
    F: FnMut(Vec<WatcherEvent>),
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatcher")
            .field("debounce", &self.debounce)
            .field("pending", &self.pending.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

fn compile_watch_paths(directory: &Path, patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let absolute = directory.join(pattern);
        match Glob::new(&absolute.to_string_lossy()) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!("Skipping invalid watch path {:?} for {:?}: {}", pattern, directory, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to compile watch paths for {:?}: {}", directory, e);
        GlobSet::empty()
    })
}
