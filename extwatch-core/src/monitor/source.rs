//! OS notification source built on the notify crate
//!
//! Reduces notify's event model to the five raw kinds the classifier
//! understands and drops excluded paths before anything else sees them.

use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

/// One raw notification, stamped when it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    pub received_at: Instant,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into(), received_at: Instant::now() }
    }
}

/// Map a notify event to raw `(kind, path)` pairs.
///
/// A directory that appears is expanded into one event per entry below it,
/// so a moved-in extension reports its manifest like a freshly written one.
pub fn translate(event: &Event) -> Vec<(RawEventKind, PathBuf)> {
    let first = || event.paths.first().cloned();

    let single = |kind: RawEventKind| first().map(|p| vec![(kind, p)]).unwrap_or_default();

    match event.kind {
        EventKind::Create(CreateKind::Folder) => first().map(expand_directory).unwrap_or_default(),
        EventKind::Create(CreateKind::Any) => first().map(appeared).unwrap_or_default(),
        EventKind::Create(_) => single(RawEventKind::Add),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => single(RawEventKind::Unlink),
            RenameMode::To => first().map(appeared).unwrap_or_default(),
            RenameMode::Both => match (event.paths.first(), event.paths.get(1)) {
                (Some(from), Some(to)) => {
                    let from_kind =
                        if to.is_dir() { RawEventKind::UnlinkDir } else { RawEventKind::Unlink };
                    let mut raw = vec![(from_kind, from.clone())];
                    raw.extend(appeared(to.clone()));
                    raw
                }
                _ => Vec::new(),
            },
            _ => match first() {
                Some(path) if path.exists() => appeared(path),
                Some(path) => vec![(RawEventKind::Unlink, path)],
                None => Vec::new(),
            },
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => single(RawEventKind::Change),
        EventKind::Remove(RemoveKind::Folder) => single(RawEventKind::UnlinkDir),
        EventKind::Remove(_) => single(RawEventKind::Unlink),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn appeared(path: PathBuf) -> Vec<(RawEventKind, PathBuf)> {
    if path.is_dir() { expand_directory(path) } else { vec![(RawEventKind::Add, path)] }
}

/// `AddDir` for `directory` and everything below it, `Add` for each file
fn expand_directory(directory: PathBuf) -> Vec<(RawEventKind, PathBuf)> {
    let walker = WalkDir::new(&directory)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && (name == "node_modules" || name == ".git"))
        });

    let mut raw = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                let kind =
                    if entry.file_type().is_dir() { RawEventKind::AddDir } else { RawEventKind::Add };
                raw.push((kind, entry.into_path()));
            }
            // Entries can vanish while a directory is being moved around
            Err(e) => trace!("Skipping entry under {:?}: {}", directory, e),
        }
    }
    if raw.is_empty() {
        raw.push((RawEventKind::AddDir, directory));
    }
    raw
}

/// Paths a source reports: single files by exact match, directories by prefix
#[derive(Debug, Clone, Default)]
struct WatchScope {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
}

impl WatchScope {
    fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f == path) || self.directories.iter().any(|d| path.starts_with(d))
    }

    /// What to hand to the OS watcher.
    ///
    /// A single file is watched through its parent directory so that
    /// replacing it (rename over, delete and recreate) keeps the watch alive.
    fn targets(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut targets: Vec<(PathBuf, RecursiveMode)> =
            self.directories.iter().map(|d| (d.clone(), RecursiveMode::Recursive)).collect();
        for file in &self.files {
            let Some(parent) = file.parent() else {
                continue;
            };
            let covered = self.directories.iter().any(|d| parent.starts_with(d))
                || targets.iter().any(|(target, _)| target == parent);
            if !covered {
                targets.push((parent.to_path_buf(), RecursiveMode::NonRecursive));
            }
        }
        targets
    }
}

/// Compile the source-level exclusion globs
pub fn build_exclusions(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Owns the OS watch handle for one session
pub struct NotificationSource {
    watcher: Option<RecommendedWatcher>,
    roots: Vec<PathBuf>,
    closed: Arc<AtomicBool>,
}

impl NotificationSource {
    /// Start watching `roots`, forwarding raw events to `tx`.
    ///
    /// Directories are watched recursively. Files (the app config) are
    /// watched through their parent, and only events for the file itself
    /// are forwarded. Roots that do not exist are skipped.
    pub fn start(
        roots: &[PathBuf],
        excluded: &[String],
        tx: mpsc::UnboundedSender<RawEvent>,
    ) -> Result<Self> {
        let exclusions = build_exclusions(excluded)?;
        let closed = Arc::new(AtomicBool::new(false));
        let callback_closed = closed.clone();

        let mut scope = WatchScope::default();
        for root in roots {
            if !root.exists() {
                warn!("Not watching {:?}: path does not exist", root);
            } else if root.is_dir() {
                scope.directories.push(root.clone());
            } else {
                scope.files.push(root.clone());
            }
        }
        let targets = scope.targets();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if callback_closed.load(Ordering::SeqCst) {
                return;
            }
            match res {
                Ok(event) => {
                    for (kind, path) in translate(&event) {
                        if !scope.contains(&path) {
                            trace!("Outside watched paths: {:?}", path);
                            continue;
                        }
                        if exclusions.is_match(&path) {
                            trace!("Excluded {:?}", path);
                            continue;
                        }
                        if let Err(e) = tx.send(RawEvent::new(kind, path)) {
                            debug!("Session no longer receiving events: {}", e);
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            }
        })?;

        let mut watched = Vec::new();
        for (target, mode) in targets {
            watcher.watch(&target, mode)?;
            info!("Watching path: {:?} (recursive: {})", target, mode == RecursiveMode::Recursive);
            watched.push(target);
        }

        Ok(Self { watcher: Some(watcher), roots: watched, closed })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop forwarding events and release the OS watch.
    ///
    /// Failures are logged; this never fails.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let Some(mut watcher) = self.watcher.take() else {
            return;
        };

        debug!("Closing file watcher");
        let mut clean = true;
        for root in &self.roots {
            if let Err(e) = watcher.unwatch(root) {
                clean = false;
                warn!("File watching failed to close for {:?}: {}", root, e);
            }
        }
        drop(watcher);
        if clean {
            debug!("File watching closed");
        }
    }
}

impl Drop for NotificationSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NotificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSource")
            .field("roots", &self.roots)
            .field("closed", &self.is_closed())
            .finish()
    }
}
