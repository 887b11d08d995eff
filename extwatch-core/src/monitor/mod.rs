//! Extension-aware file watching
//!
//! Turns the raw add/change/unlink stream of an app project into a small
//! set of semantic events:
//! - Raw notifications are attached to the extension that owns them
//! - Extension creation waits for the scaffolding lock file to clear
//! - Extension deletion wins over the per-file deletes it fans out into
//! - Per-extension `.gitignore` rules and custom watch paths filter events
//! - Events are deduplicated and flushed in debounced batches

pub mod batcher;
pub mod ignore_rules;
pub mod lifecycle;
pub mod normalizer;
pub mod source;
pub mod watcher;

pub use batcher::EventBatcher;
pub use ignore_rules::IgnoreIndex;
pub use lifecycle::{ExtensionPaths, LifecycleClassifier, LockFilePoll, PollOutcome};
pub use normalizer::{EventNormalizer, NormalizedEvent};
pub use source::{NotificationSource, RawEvent, RawEventKind};
pub use watcher::{SessionCallbacks, WatchSession};

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Semantic change reported to the session callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherEventKind {
    ExtensionFolderCreated,
    ExtensionFolderDeleted,
    FileCreated,
    FileUpdated,
    FileDeleted,
    ExtensionsConfigUpdated,
    AppConfigDeleted,
}

impl WatcherEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtensionFolderCreated => "extension_folder_created",
            Self::ExtensionFolderDeleted => "extension_folder_deleted",
            Self::FileCreated => "file_created",
            Self::FileUpdated => "file_updated",
            Self::FileDeleted => "file_deleted",
            Self::ExtensionsConfigUpdated => "extensions_config_updated",
            Self::AppConfigDeleted => "app_config_deleted",
        }
    }
}

impl fmt::Display for WatcherEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory that owns an event: an extension, the project root for
/// app-config events, or unknown while an extension is still being scaffolded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExtensionPath {
    Known(PathBuf),
    Unknown,
}

impl ExtensionPath {
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Known(path) => Some(path),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ExtensionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(path) => write!(f, "{}", path.display()),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// A classified change. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub kind: WatcherEventKind,
    pub path: PathBuf,
    pub extension_path: ExtensionPath,
    /// When the raw notification arrived
    pub start_time: Instant,
}

impl WatcherEvent {
    pub fn new(
        kind: WatcherEventKind,
        path: PathBuf,
        extension_path: ExtensionPath,
        start_time: Instant,
    ) -> Self {
        Self { kind, path, extension_path, start_time }
    }
}

impl Serialize for WatcherEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("WatcherEvent", 4)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("path", &self.path.display().to_string())?;
        state.serialize_field("extension_path", &self.extension_path.to_string())?;
        state.serialize_field("elapsed_ms", &(self.start_time.elapsed().as_millis() as u64))?;
        state.end()
    }
}
