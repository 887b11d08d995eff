//! Watch session: wires the notification source through normalization,
//! classification and batching on a single task

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::monitor::batcher::EventBatcher;
use crate::monitor::ignore_rules::IgnoreIndex;
use crate::monitor::lifecycle::{
    Decision, ExtensionPaths, LifecycleClassifier, LockFilePoll, PendingCreation, PollOutcome,
    settle_delay,
};
use crate::monitor::normalizer::EventNormalizer;
use crate::monitor::source::{NotificationSource, RawEvent, RawEventKind};
use crate::monitor::WatcherEvent;
use crate::registry::{self, AppRegistry};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

type ChangeCallback = Box<dyn FnMut(Vec<WatcherEvent>) + Send>;
type ErrorCallback = Box<dyn FnMut(WatchError) + Send>;

/// Where a session delivers its output
pub struct SessionCallbacks {
    pub on_change: ChangeCallback,
    pub on_error: ErrorCallback,
}

impl SessionCallbacks {
    pub fn new<C, E>(on_change: C, on_error: E) -> Self
    where
        C: FnMut(Vec<WatcherEvent>) + Send + 'static,
        E: FnMut(WatchError) + Send + 'static,
    {
        Self { on_change: Box::new(on_change), on_error: Box::new(on_error) }
    }
}

/// Results of delayed follow-ups, sent back to the session task
#[derive(Debug)]
enum FollowUp {
    CreationReady(PendingCreation),
    CreationTimedOut(PendingCreation),
    DeletionSettled(WatcherEvent),
}

/// Handle to a running watch session
pub struct WatchSession {
    source: Option<NotificationSource>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Start watching the project described by `registry`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        registry: &AppRegistry,
        config: &WatchConfig,
        callbacks: SessionCallbacks,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let roots = registry.project.watch_roots();
        let source = NotificationSource::start(&roots, &config.excluded, raw_tx)?;
        info!("File watcher started for {:?}", registry.project.root);

        let mut session = Self::spawn_pipeline(registry, config, callbacks, raw_rx);
        session.source = Some(source);
        Ok(session)
    }

    /// Run the pipeline on raw events from `raw_rx` without an OS watcher
    pub fn spawn_pipeline(
        registry: &AppRegistry,
        config: &WatchConfig,
        callbacks: SessionCallbacks,
        raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let session = Session::new(registry, config, callbacks);
        let task = tokio::spawn(session.run(raw_rx, shutdown_rx));
        Self { source: None, shutdown, task: Some(task) }
    }

    /// Stop accepting notifications and release the OS watch.
    ///
    /// Synchronous and idempotent. Pending timers finish as no-ops and
    /// unflushed events are discarded.
    pub fn cancel(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if !*self.shutdown.borrow() {
            debug!("Cancelling watch session");
            self.shutdown.send_replace(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for the session task to exit
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watch session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("source", &self.source)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// State owned by the session task. Nothing else touches it.
struct Session {
    normalizer: EventNormalizer,
    classifier: LifecycleClassifier,
    batcher: EventBatcher<ChangeCallback>,
    on_error: ErrorCallback,
    lock_file: String,
    /// Extension directories with a lock-file poll in flight
    creating: HashSet<PathBuf>,
    /// Unlinked paths still inside their settle delay
    pending_unlinks: HashSet<PathBuf>,
    follow_tx: mpsc::UnboundedSender<FollowUp>,
    follow_rx: mpsc::UnboundedReceiver<FollowUp>,
}

impl Session {
    fn new(registry: &AppRegistry, config: &WatchConfig, callbacks: SessionCallbacks) -> Self {
        let extensions = ExtensionPaths::new(registry.extension_directories());
        let ignore_index = IgnoreIndex::build(config.ignore_file.clone(), extensions.iter());

        let mut batcher = EventBatcher::new(config.debounce(), ignore_index, callbacks.on_change);
        for extension in &registry.extensions {
            if let Some(patterns) = &extension.watch_paths {
                batcher.register_extension(&extension.directory, Some(patterns.as_slice()));
            }
        }

        let (follow_tx, follow_rx) = mpsc::unbounded_channel();
        Self {
            normalizer: EventNormalizer::new(
                &registry.project,
                config.manifest_suffix.clone(),
                config.lock_file.clone(),
            ),
            classifier: LifecycleClassifier::new(extensions),
            batcher,
            on_error: callbacks.on_error,
            lock_file: config.lock_file.clone(),
            creating: HashSet::new(),
            pending_unlinks: HashSet::new(),
            follow_tx,
            follow_rx,
        }
    }

    async fn run(
        mut self,
        mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Watch session running with {} extension(s)", self.classifier.extensions().len());
        let mut raw_open = true;

        loop {
            let deadline = self.batcher.deadline();
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                raw = raw_rx.recv(), if raw_open => match raw {
                    Some(raw) => self.handle_raw(raw),
                    None => {
                        debug!("Notification source closed");
                        raw_open = false;
                    }
                },
                Some(follow_up) = self.follow_rx.recv() => self.handle_follow_up(follow_up),
                _ = flush_timer(deadline) => self.batcher.flush(),
            }
        }

        let dropped = self.batcher.discard();
        if dropped > 0 {
            debug!("Discarded {} unflushed event(s)", dropped);
        }
        info!("Watch session stopped");
    }

    fn handle_raw(&mut self, mut raw: RawEvent) {
        if matches!(raw.kind, RawEventKind::Unlink | RawEventKind::UnlinkDir) {
            for event in self.classifier.remove_extensions_within(&raw.path, raw.received_at) {
                self.batcher.push(event);
            }
        }
        if raw.kind == RawEventKind::Add && self.pending_unlinks.remove(&raw.path) {
            debug!("{:?} was written back after being unlinked", raw.path);
            raw.kind = RawEventKind::Change;
        }

        let Some(event) = self.normalizer.normalize(raw, self.classifier.extensions()) else {
            return;
        };
        let path = event.path().to_path_buf();

        match self.classifier.classify(event) {
            Decision::Drop(reason) => debug!("Ignoring {:?}: {}", path, reason),
            Decision::Emit(event) => {
                self.batcher.push(event);
            }
            Decision::AwaitLockFile(creation) => {
                if !self.creating.insert(creation.directory.clone()) {
                    debug!("Already waiting for {:?} to be created", creation.directory);
                    return;
                }
                let poll = LockFilePoll::new(&creation.directory, &self.lock_file);
                tokio::spawn(wait_for_lock_file(poll, creation, self.follow_tx.clone()));
            }
            Decision::ConfirmDeletion(event) => {
                self.pending_unlinks.insert(event.path.clone());
                tokio::spawn(settle_deletion(event, self.follow_tx.clone()));
            }
        }
    }

    fn handle_follow_up(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::CreationReady(creation) => {
                self.creating.remove(&creation.directory);
                let directory = creation.directory.clone();
                let watch_paths = registry::read_watch_paths(&creation.manifest);
                let event = self.classifier.complete_creation(creation);
                self.batcher.register_extension(&directory, watch_paths.as_deref());
                self.batcher.push(event);
            }
            FollowUp::CreationTimedOut(creation) => {
                self.creating.remove(&creation.directory);
                error!("Timed out waiting for extension creation: {:?}", creation.manifest);
                (self.on_error)(WatchError::ExtensionCreationTimeout {
                    manifest: creation.manifest,
                });
            }
            FollowUp::DeletionSettled(event) => {
                if !self.pending_unlinks.remove(&event.path) {
                    debug!("Not reporting deletion of {:?}: it was written back", event.path);
                    return;
                }
                if let Some(event) = self.classifier.settle_deletion(event) {
                    self.batcher.push(event);
                }
            }
        }
    }
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_lock_file(
    mut poll: LockFilePoll,
    creation: PendingCreation,
    tx: mpsc::UnboundedSender<FollowUp>,
) {
    let mut ticker = tokio::time::interval(poll.interval());
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }
        let follow_up = match poll.check() {
            PollOutcome::Waiting => {
                debug!("Waiting for extension to complete creation: {:?}", creation.manifest);
                continue;
            }
            PollOutcome::Cleared => FollowUp::CreationReady(creation),
            PollOutcome::TimedOut => FollowUp::CreationTimedOut(creation),
        };
        let _ = tx.send(follow_up);
        return;
    }
}

async fn settle_deletion(event: WatcherEvent, tx: mpsc::UnboundedSender<FollowUp>) {
    sleep(settle_delay(&event)).await;
    let _ = tx.send(FollowUp::DeletionSettled(event));
}
