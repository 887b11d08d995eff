//! Attach extension context to raw notifications

use crate::monitor::lifecycle::ExtensionPaths;
use crate::monitor::source::{RawEvent, RawEventKind};
use crate::monitor::ExtensionPath;
use crate::registry::WatchedProject;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A raw event plus what the normalizer learned about its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub raw: RawEvent,
    pub extension_path: ExtensionPath,
    pub is_config_path: bool,
    pub is_manifest: bool,
    pub is_lock_file: bool,
}

impl NormalizedEvent {
    pub fn kind(&self) -> RawEventKind {
        self.raw.kind
    }

    pub fn path(&self) -> &Path {
        &self.raw.path
    }
}

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    project_root: PathBuf,
    config_path: PathBuf,
    manifest_suffix: String,
    lock_file: String,
}

impl EventNormalizer {
    pub fn new(
        project: &WatchedProject,
        manifest_suffix: impl Into<String>,
        lock_file: impl Into<String>,
    ) -> Self {
        Self {
            project_root: project.root.clone(),
            config_path: project.config_path.clone(),
            manifest_suffix: manifest_suffix.into(),
            lock_file: lock_file.into(),
        }
    }

    pub fn is_manifest(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(&self.manifest_suffix))
    }

    pub fn lock_file_name(&self) -> &str {
        &self.lock_file
    }

    /// Resolve the owner of `raw`.
    ///
    /// Returns `None` for paths that belong to no known extension and carry
    /// no structural signal (neither the app config nor a manifest).
    pub fn normalize(
        &self,
        mut raw: RawEvent,
        extensions: &ExtensionPaths,
    ) -> Option<NormalizedEvent> {
        let is_config_path = raw.path == self.config_path;
        if is_config_path && raw.kind == RawEventKind::Add {
            // The app config existed at startup; it reappearing means it was replaced
            raw.kind = RawEventKind::Change;
        }
        let path = raw.path.as_path();
        let is_manifest = self.is_manifest(path);
        let is_lock_file = path.file_name().is_some_and(|name| name == self.lock_file.as_str());

        let extension_path = match extensions.owner_of(path) {
            Some(directory) => ExtensionPath::Known(directory.to_path_buf()),
            None if is_config_path => ExtensionPath::Known(self.project_root.clone()),
            None => ExtensionPath::Unknown,
        };

        trace!(
            "{:?} {}",
            raw.kind,
            path.strip_prefix(&self.project_root).unwrap_or(path).display()
        );

        if extension_path.is_unknown() && !is_manifest && !is_config_path {
            debug!("Dropping {:?}: outside every known extension", path);
            return None;
        }

        Some(NormalizedEvent { raw, extension_path, is_config_path, is_manifest, is_lock_file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> EventNormalizer {
        let project = WatchedProject::new(
            PathBuf::from("/app"),
            PathBuf::from("/app/shopify.app.toml"),
            vec![PathBuf::from("/app/extensions")],
        );
        EventNormalizer::new(&project, ".extension.toml", ".shopify.lock")
    }

    fn extensions() -> ExtensionPaths {
        ExtensionPaths::new(vec![
            PathBuf::from("/app/extensions/cart"),
            PathBuf::from("/app/extensions/checkout"),
        ])
    }

    #[test]
    fn test_config_path_owned_by_project_root() {
        let event = normalizer()
            .normalize(RawEvent::new(RawEventKind::Change, "/app/shopify.app.toml"), &extensions())
            .unwrap();
        assert!(event.is_config_path);
        assert!(!event.is_manifest);
        assert_eq!(event.extension_path, ExtensionPath::Known(PathBuf::from("/app")));
    }

    #[test]
    fn test_config_added_back_is_a_change() {
        let event = normalizer()
            .normalize(RawEvent::new(RawEventKind::Add, "/app/shopify.app.toml"), &extensions())
            .unwrap();
        assert_eq!(event.kind(), RawEventKind::Change);
        assert!(event.is_config_path);
    }

    #[test]
    fn test_file_inside_extension() {
        let event = normalizer()
            .normalize(
                RawEvent::new(RawEventKind::Change, "/app/extensions/checkout/src/index.js"),
                &extensions(),
            )
            .unwrap();
        assert_eq!(
            event.extension_path,
            ExtensionPath::Known(PathBuf::from("/app/extensions/checkout"))
        );
        assert_eq!(event.kind(), RawEventKind::Change);
    }

    #[test]
    fn test_sibling_prefix_is_not_a_subpath() {
        let result = normalizer().normalize(
            RawEvent::new(RawEventKind::Add, "/app/extensions/cart-v2/index.js"),
            &extensions(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_unknown_manifest_is_kept() {
        let event = normalizer()
            .normalize(
                RawEvent::new(RawEventKind::Add, "/app/extensions/new/new.extension.toml"),
                &extensions(),
            )
            .unwrap();
        assert!(event.is_manifest);
        assert!(event.extension_path.is_unknown());
    }

    #[test]
    fn test_lock_file_flagged() {
        let event = normalizer()
            .normalize(
                RawEvent::new(RawEventKind::Unlink, "/app/extensions/cart/.shopify.lock"),
                &extensions(),
            )
            .unwrap();
        assert!(event.is_lock_file);
    }

    #[test]
    fn test_unknown_plain_file_dropped() {
        let result = normalizer()
            .normalize(RawEvent::new(RawEventKind::Change, "/app/extensions/new/a.js"), &extensions());
        assert!(result.is_none());
    }
}
