//! Extension lifecycle state machine
//!
//! Decides which semantic event a normalized notification becomes. Two
//! cases cannot be decided on the spot and are handed back to the session
//! as delayed follow-ups:
//!
//! - A new manifest means an extension is being scaffolded. It is only
//!   registered once the scaffolding lock file next to it disappears.
//! - Deleting an extension folder fans out into one unlink per file plus
//!   one for the manifest, in no particular order. Plain file unlinks wait
//!   [`DELETION_SETTLE_DELAY`] and are dropped if the manifest unlink
//!   deregistered their extension in the meantime.
//!
//! Moving an extension directory away produces no per-file unlinks at all,
//! only one for the directory (or an ancestor), which
//! [`LifecycleClassifier::remove_extensions_within`] turns into deletions.

use crate::monitor::normalizer::NormalizedEvent;
use crate::monitor::source::RawEventKind;
use crate::monitor::{ExtensionPath, WatcherEvent, WatcherEventKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Give up on a scaffolding lock file after this long
pub const EXTENSION_CREATION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// How often the lock file is checked
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a plain file unlink waits for a manifest unlink to overtake it
pub const DELETION_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How long an app config unlink waits for the file to be written back
pub const ATOMIC_SAVE_WINDOW: Duration = Duration::from_millis(100);

/// How long a [`Decision::ConfirmDeletion`] event is held before it is settled
pub fn settle_delay(event: &WatcherEvent) -> Duration {
    match event.kind {
        WatcherEventKind::AppConfigDeleted => ATOMIC_SAVE_WINDOW,
        _ => DELETION_SETTLE_DELAY,
    }
}

/// Ordered set of extension directories currently being tracked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionPaths {
    directories: Vec<PathBuf>,
}

impl ExtensionPaths {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        let mut paths = Self::default();
        for directory in directories {
            paths.register(directory);
        }
        paths
    }

    /// First registered directory that contains `path`
    pub fn owner_of(&self, path: &Path) -> Option<&Path> {
        self.directories
            .iter()
            .find(|directory| path.starts_with(directory))
            .map(PathBuf::as_path)
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.directories.iter().any(|d| d == directory)
    }

    /// Registered directories equal to or below `path`
    pub fn within(&self, path: &Path) -> Vec<PathBuf> {
        self.directories.iter().filter(|d| d.starts_with(path)).cloned().collect()
    }

    /// Returns `false` if the directory was already registered
    pub fn register(&mut self, directory: PathBuf) -> bool {
        if self.contains(&directory) {
            return false;
        }
        self.directories.push(directory);
        true
    }

    pub fn deregister(&mut self, directory: &Path) -> bool {
        let before = self.directories.len();
        self.directories.retain(|d| d != directory);
        before != self.directories.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.directories.iter()
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Waiting,
    Cleared,
    TimedOut,
}

/// `Polling → {Cleared, TimedOut}` for one lock file
#[derive(Debug, Clone)]
pub struct LockFilePoll {
    lock_path: PathBuf,
    elapsed: Duration,
    interval: Duration,
    timeout: Duration,
}

impl LockFilePoll {
    pub fn new(directory: &Path, lock_file: &str) -> Self {
        Self {
            lock_path: directory.join(lock_file),
            elapsed: Duration::ZERO,
            interval: LOCK_POLL_INTERVAL,
            timeout: EXTENSION_CREATION_TIMEOUT,
        }
    }

    pub fn with_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Advance by one poll given whether the lock file is present
    pub fn tick(&mut self, lock_present: bool) -> PollOutcome {
        if !lock_present {
            return PollOutcome::Cleared;
        }
        self.elapsed += self.interval;
        if self.elapsed >= self.timeout {
            PollOutcome::TimedOut
        } else {
            PollOutcome::Waiting
        }
    }

    /// Poll the filesystem once
    pub fn check(&mut self) -> PollOutcome {
        let present = self.lock_path.exists();
        self.tick(present)
    }
}

/// An extension whose manifest appeared and which is waiting for its lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreation {
    pub manifest: PathBuf,
    pub directory: PathBuf,
    pub extension_path: ExtensionPath,
    pub start_time: Instant,
}

/// Outcome of classifying one normalized event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Drop(&'static str),
    Emit(WatcherEvent),
    /// Start polling for the scaffolding lock file
    AwaitLockFile(PendingCreation),
    /// Hold for [`settle_delay`], then keep it only if nothing replaced the
    /// path and its extension still exists
    ConfirmDeletion(WatcherEvent),
}

/// Owns the set of live extension directories and the only two places it changes
#[derive(Debug, Default)]
pub struct LifecycleClassifier {
    extensions: ExtensionPaths,
}

impl LifecycleClassifier {
    pub fn new(extensions: ExtensionPaths) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &ExtensionPaths {
        &self.extensions
    }

    pub fn classify(&mut self, event: NormalizedEvent) -> Decision {
        let NormalizedEvent { raw, extension_path, is_config_path, is_manifest, is_lock_file } =
            event;
        let emit = |kind: WatcherEventKind, path: PathBuf, owner: ExtensionPath| {
            Decision::Emit(WatcherEvent::new(kind, path, owner, raw.received_at))
        };

        match raw.kind {
            RawEventKind::AddDir | RawEventKind::UnlinkDir => Decision::Drop("directory event"),
            RawEventKind::Change => {
                if extension_path.is_unknown() {
                    Decision::Drop("extension is still being created")
                } else if is_manifest || is_config_path {
                    emit(WatcherEventKind::ExtensionsConfigUpdated, raw.path, extension_path)
                } else {
                    emit(WatcherEventKind::FileUpdated, raw.path, extension_path)
                }
            }
            RawEventKind::Add => {
                if !is_manifest {
                    return emit(WatcherEventKind::FileCreated, raw.path, extension_path);
                }
                let Some(directory) = raw.path.parent().map(Path::to_path_buf) else {
                    return Decision::Drop("manifest without a parent directory");
                };
                debug!("Manifest added at {:?}, waiting for scaffolding to finish", raw.path);
                Decision::AwaitLockFile(PendingCreation {
                    manifest: raw.path,
                    directory,
                    extension_path,
                    start_time: raw.received_at,
                })
            }
            RawEventKind::Unlink => {
                if is_lock_file {
                    Decision::Drop("lock file removed")
                } else if is_config_path {
                    Decision::ConfirmDeletion(WatcherEvent::new(
                        WatcherEventKind::AppConfigDeleted,
                        raw.path,
                        extension_path,
                        raw.received_at,
                    ))
                } else if is_manifest {
                    let ExtensionPath::Known(directory) = extension_path else {
                        return Decision::Drop("manifest of an untracked extension removed");
                    };
                    // The whole extension is gone; this one event stands in for all its files
                    self.extensions.deregister(&directory);
                    info!("Extension removed: {:?}", directory);
                    emit(
                        WatcherEventKind::ExtensionFolderDeleted,
                        directory.clone(),
                        ExtensionPath::Known(directory),
                    )
                } else {
                    Decision::ConfirmDeletion(WatcherEvent::new(
                        WatcherEventKind::FileDeleted,
                        raw.path,
                        extension_path,
                        raw.received_at,
                    ))
                }
            }
        }
    }

    /// The lock file is gone: register the extension and build its event
    pub fn complete_creation(&mut self, creation: PendingCreation) -> WatcherEvent {
        if self.extensions.register(creation.directory.clone()) {
            info!("Extension created: {:?}", creation.directory);
        }
        WatcherEvent::new(
            WatcherEventKind::ExtensionFolderCreated,
            creation.directory,
            creation.extension_path,
            creation.start_time,
        )
    }

    /// Deregister every extension at or below a removed directory
    pub fn remove_extensions_within(
        &mut self,
        path: &Path,
        received_at: Instant,
    ) -> Vec<WatcherEvent> {
        let mut removed = Vec::new();
        for directory in self.extensions.within(path) {
            self.extensions.deregister(&directory);
            info!("Extension removed: {:?}", directory);
            removed.push(WatcherEvent::new(
                WatcherEventKind::ExtensionFolderDeleted,
                directory.clone(),
                ExtensionPath::Known(directory),
                received_at,
            ));
        }
        removed
    }

    /// Keep a delayed deletion only if its extension still exists
    pub fn settle_deletion(&self, event: WatcherEvent) -> Option<WatcherEvent> {
        if event.kind == WatcherEventKind::AppConfigDeleted {
            return Some(event);
        }
        match event.extension_path.as_path() {
            Some(directory) if self.extensions.contains(directory) => Some(event),
            _ => {
                debug!("Suppressing {:?}: its extension was deleted", event.path);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::normalizer::EventNormalizer;
    use crate::monitor::source::RawEvent;
    use crate::registry::WatchedProject;
    use tempfile::TempDir;

    fn setup() -> (EventNormalizer, LifecycleClassifier) {
        let project = WatchedProject::new(
            PathBuf::from("/app"),
            PathBuf::from("/app/shopify.app.toml"),
            vec![PathBuf::from("/app/extensions")],
        );
        let normalizer = EventNormalizer::new(&project, ".extension.toml", ".shopify.lock");
        let classifier =
            LifecycleClassifier::new(ExtensionPaths::new(vec![PathBuf::from("/app/extensions/cart")]));
        (normalizer, classifier)
    }

    fn classify(kind: RawEventKind, path: &str) -> (Decision, LifecycleClassifier) {
        let (normalizer, mut classifier) = setup();
        let event = normalizer
            .normalize(RawEvent::new(kind, path), classifier.extensions())
            .expect("event should survive normalization");
        (classifier.classify(event), classifier)
    }

    fn emitted(decision: Decision) -> WatcherEvent {
        match decision {
            Decision::Emit(event) => event,
            other => panic!("expected an emitted event, got {:?}", other),
        }
    }

    #[test]
    fn test_change_on_app_config() {
        let (decision, _) = classify(RawEventKind::Change, "/app/shopify.app.toml");
        let event = emitted(decision);
        assert_eq!(event.kind, WatcherEventKind::ExtensionsConfigUpdated);
        assert_eq!(event.extension_path, ExtensionPath::Known(PathBuf::from("/app")));
    }

    #[test]
    fn test_change_on_extension_files() {
        let (decision, _) = classify(RawEventKind::Change, "/app/extensions/cart/src/index.js");
        let event = emitted(decision);
        assert_eq!(event.kind, WatcherEventKind::FileUpdated);
        assert_eq!(
            event.extension_path,
            ExtensionPath::Known(PathBuf::from("/app/extensions/cart"))
        );

        let (decision, _) =
            classify(RawEventKind::Change, "/app/extensions/cart/cart.extension.toml");
        assert_eq!(emitted(decision).kind, WatcherEventKind::ExtensionsConfigUpdated);
    }

    #[test]
    fn test_change_on_unknown_manifest_dropped() {
        let (decision, _) = classify(RawEventKind::Change, "/app/extensions/new/new.extension.toml");
        assert!(matches!(decision, Decision::Drop(_)));
    }

    #[test]
    fn test_directory_events_dropped() {
        let (decision, _) = classify(RawEventKind::AddDir, "/app/extensions/cart/src");
        assert!(matches!(decision, Decision::Drop(_)));
        let (decision, _) = classify(RawEventKind::UnlinkDir, "/app/extensions/cart/src");
        assert!(matches!(decision, Decision::Drop(_)));
    }

    #[test]
    fn test_add_plain_file_emits_file_created() {
        let (decision, _) = classify(RawEventKind::Add, "/app/extensions/cart/src/new.js");
        assert_eq!(emitted(decision).kind, WatcherEventKind::FileCreated);
    }

    #[test]
    fn test_add_manifest_waits_for_lock_file() {
        let (decision, mut classifier) =
            classify(RawEventKind::Add, "/app/extensions/new/new.extension.toml");
        let Decision::AwaitLockFile(creation) = decision else {
            panic!("expected lock file wait, got {:?}", decision);
        };
        assert_eq!(creation.directory, PathBuf::from("/app/extensions/new"));
        assert!(!classifier.extensions().contains(Path::new("/app/extensions/new")));

        let event = classifier.complete_creation(creation);
        assert_eq!(event.kind, WatcherEventKind::ExtensionFolderCreated);
        assert_eq!(event.path, PathBuf::from("/app/extensions/new"));
        assert!(classifier.extensions().contains(Path::new("/app/extensions/new")));
    }

    #[test]
    fn test_unlink_lock_file_ignored() {
        let (decision, _) = classify(RawEventKind::Unlink, "/app/extensions/cart/.shopify.lock");
        assert_eq!(decision, Decision::Drop("lock file removed"));
    }

    #[test]
    fn test_unlink_app_config_waits_for_atomic_save() {
        let (decision, classifier) = classify(RawEventKind::Unlink, "/app/shopify.app.toml");
        let Decision::ConfirmDeletion(pending) = decision else {
            panic!("expected the config deletion to wait");
        };
        assert_eq!(pending.kind, WatcherEventKind::AppConfigDeleted);
        assert_eq!(settle_delay(&pending), ATOMIC_SAVE_WINDOW);
        assert_eq!(classifier.settle_deletion(pending.clone()), Some(pending));
    }

    #[test]
    fn test_directory_removal_deregisters_extensions_below_it() {
        let (_, mut classifier) = setup();
        let now = Instant::now();
        let nested = classifier.remove_extensions_within(Path::new("/app/extensions/cart/src"), now);
        assert!(nested.is_empty());

        let removed = classifier.remove_extensions_within(Path::new("/app/extensions"), now);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].kind, WatcherEventKind::ExtensionFolderDeleted);
        assert_eq!(removed[0].path, PathBuf::from("/app/extensions/cart"));
        assert!(classifier.extensions().is_empty());
    }

    #[test]
    fn test_unlink_manifest_deregisters_extension() {
        let (decision, classifier) =
            classify(RawEventKind::Unlink, "/app/extensions/cart/cart.extension.toml");
        let event = emitted(decision);
        assert_eq!(event.kind, WatcherEventKind::ExtensionFolderDeleted);
        assert_eq!(event.path, PathBuf::from("/app/extensions/cart"));
        assert!(classifier.extensions().is_empty());
    }

    #[test]
    fn test_unlink_file_settles_against_registry() {
        let (normalizer, mut classifier) = setup();
        let file = normalizer
            .normalize(
                RawEvent::new(RawEventKind::Unlink, "/app/extensions/cart/src/index.js"),
                classifier.extensions(),
            )
            .unwrap();
        let Decision::ConfirmDeletion(pending) = classifier.classify(file) else {
            panic!("expected deletion to wait");
        };
        assert_eq!(classifier.settle_deletion(pending.clone()), Some(pending.clone()));

        let manifest = normalizer
            .normalize(
                RawEvent::new(RawEventKind::Unlink, "/app/extensions/cart/cart.extension.toml"),
                classifier.extensions(),
            )
            .unwrap();
        classifier.classify(manifest);
        assert_eq!(classifier.settle_deletion(pending), None);
    }

    #[test]
    fn test_extension_paths_keep_order_without_duplicates() {
        let mut paths = ExtensionPaths::new(vec![PathBuf::from("/a"), PathBuf::from("/a/b")]);
        assert!(!paths.register(PathBuf::from("/a")));
        assert_eq!(paths.len(), 2);
        assert_eq!(paths.owner_of(Path::new("/a/b/c.js")), Some(Path::new("/a")));
        assert!(paths.deregister(Path::new("/a")));
        assert_eq!(paths.owner_of(Path::new("/a/b/c.js")), Some(Path::new("/a/b")));
        assert!(!paths.deregister(Path::new("/a")));
        assert_eq!(paths.within(Path::new("/a")), vec![PathBuf::from("/a/b")]);
        assert!(paths.within(Path::new("/a/b/c.js")).is_empty());
    }

    #[test]
    fn test_lock_poll_times_out_after_300_polls() {
        let mut poll = LockFilePoll::new(Path::new("/app/extensions/new"), ".shopify.lock");
        for _ in 0..299 {
            assert_eq!(poll.tick(true), PollOutcome::Waiting);
        }
        assert_eq!(poll.tick(true), PollOutcome::TimedOut);
        assert_eq!(poll.elapsed(), EXTENSION_CREATION_TIMEOUT);
    }

    #[test]
    fn test_lock_poll_clears_when_file_absent() {
        let temp_dir = TempDir::new().unwrap();
        let mut poll = LockFilePoll::new(temp_dir.path(), ".shopify.lock");
        std::fs::write(poll.lock_path(), "").unwrap();
        assert_eq!(poll.check(), PollOutcome::Waiting);

        std::fs::remove_file(poll.lock_path()).unwrap();
        assert_eq!(poll.check(), PollOutcome::Cleared);
    }
}
