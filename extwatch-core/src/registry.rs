//! Application and extension registry
//!
//! A read-only snapshot of the project taken when a watch session starts:
//! where the app configuration lives, which directories hold extensions,
//! and which extensions already exist.

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension root used when the app configuration does not list any
pub const DEFAULT_EXTENSION_DIRECTORY: &str = "extensions";

/// Immutable description of the watched project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedProject {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub extension_roots: Vec<PathBuf>,
}

impl WatchedProject {
    pub fn new(root: PathBuf, config_path: PathBuf, extension_roots: Vec<PathBuf>) -> Self {
        Self { root, config_path, extension_roots }
    }

    /// Every path handed to the OS watcher: the config file, then each extension root
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(self.extension_roots.len() + 1);
        roots.push(self.config_path.clone());
        roots.extend(self.extension_roots.iter().cloned());
        roots
    }
}

/// An extension known at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionEntry {
    pub directory: PathBuf,
    /// Custom watch-path globs, relative to `directory`. `None` means every file counts.
    pub watch_paths: Option<Vec<String>>,
}

impl ExtensionEntry {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory, watch_paths: None }
    }

    pub fn with_watch_paths(mut self, patterns: Vec<String>) -> Self {
        self.watch_paths = Some(patterns);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRegistry {
    pub project: WatchedProject,
    pub extensions: Vec<ExtensionEntry>,
}

impl AppRegistry {
    pub fn new(project: WatchedProject, extensions: Vec<ExtensionEntry>) -> Self {
        Self { project, extensions }
    }

    /// Build the registry by reading the app configuration and scanning
    /// the extension roots for manifests.
    pub fn load(root: &Path, config: &WatchConfig) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            WatchError::Registry(format!("cannot resolve project root {}: {}", root.display(), e))
        })?;
        let config_path = root.join(&config.app_config_file);
        if !config_path.is_file() {
            return Err(WatchError::Registry(format!(
                "app configuration not found at {}",
                config_path.display()
            )));
        }

        let directories = read_extension_directories(&config_path)?;
        let mut extension_roots: Vec<PathBuf> = Vec::new();
        for directory in &directories {
            let extension_root = root.join(literal_prefix(directory));
            if !extension_roots.contains(&extension_root) {
                extension_roots.push(extension_root);
            }
        }

        let project = WatchedProject::new(root, config_path, extension_roots);
        let extensions = discover_extensions(&project, &config.manifest_suffix);
        debug!(
            "Loaded registry for {:?}: {} extension root(s), {} extension(s)",
            project.root,
            project.extension_roots.len(),
            extensions.len()
        );

        Ok(Self { project, extensions })
    }

    pub fn extension(&self, directory: &Path) -> Option<&ExtensionEntry> {
        self.extensions.iter().find(|ext| ext.directory == directory)
    }

    /// Extension directories a session starts with. The project root is
    /// never treated as an extension.
    pub fn extension_directories(&self) -> Vec<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| ext.directory.clone())
            .filter(|dir| *dir != self.project.root)
            .collect()
    }
}

/// Read `[build] watch` from an extension manifest
pub fn read_watch_paths(manifest: &Path) -> Option<Vec<String>> {
    let content = match std::fs::read_to_string(manifest) {
        Ok(content) => content,
        Err(e) => {
            debug!("Could not read manifest {:?}: {}", manifest, e);
            return None;
        }
    };
    let table: toml::Table = match toml::from_str(&content) {
        Ok(table) => table,
        Err(e) => {
            warn!("Ignoring unparseable manifest {:?}: {}", manifest, e);
            return None;
        }
    };

    let watch = table.get("build")?.get("watch")?.as_array()?;
    Some(watch.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

fn read_extension_directories(config_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(config_path)?;
    let table: toml::Table = toml::from_str(&content)?;

    let directories: Vec<String> = match table.get("extension_directories") {
        Some(value) => value
            .as_array()
            .ok_or_else(|| {
                WatchError::Registry("extension_directories must be an array".to_string())
            })?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        None => Vec::new(),
    };

    if directories.is_empty() {
        return Ok(vec![DEFAULT_EXTENSION_DIRECTORY.to_string()]);
    }
    Ok(directories)
}

/// `extensions/*` and `extensions/**/` both watch `extensions`
fn literal_prefix(pattern: &str) -> PathBuf {
    Path::new(pattern)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .take_while(|c| !c.as_os_str().to_string_lossy().contains(['*', '?', '[', '{']))
        .collect()
}

fn discover_extensions(project: &WatchedProject, manifest_suffix: &str) -> Vec<ExtensionEntry> {
    let mut extensions: Vec<ExtensionEntry> = Vec::new();

    for extension_root in &project.extension_roots {
        if !extension_root.is_dir() {
            debug!("Extension root {:?} does not exist yet", extension_root);
            continue;
        }

        let walker = WalkDir::new(extension_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && (name == "node_modules" || name == ".git"))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file()
                || !entry.file_name().to_string_lossy().ends_with(manifest_suffix)
            {
                continue;
            }
            let Some(directory) = entry.path().parent() else { continue };
            if directory == project.root || extensions.iter().any(|e| e.directory == directory) {
                continue;
            }

            let mut extension = ExtensionEntry::new(directory.to_path_buf());
            extension.watch_paths = read_watch_paths(entry.path());
            extensions.push(extension);
        }
    }

    extensions
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_defaults_to_extensions_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("shopify.app.toml"), "name = \"app\"\n");
        write(&root.join("extensions/cart/cart.extension.toml"), "type = \"ui\"\n");
        write(&root.join("extensions/cart/src/index.js"), "");

        let registry = AppRegistry::load(root, &WatchConfig::default()).unwrap();
        let root = std::fs::canonicalize(root).unwrap();

        assert_eq!(registry.project.extension_roots, vec![root.join("extensions")]);
        assert_eq!(registry.project.config_path, root.join("shopify.app.toml"));
        assert_eq!(registry.extension_directories(), vec![root.join("extensions/cart")]);
        assert_eq!(registry.extensions[0].watch_paths, None);
    }

    #[test]
    fn test_load_reads_configured_directories_and_watch_paths() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(
            &root.join("shopify.app.toml"),
            "extension_directories = [\"ui/*\", \"functions\"]\n",
        );
        write(
            &root.join("functions/discount/discount.extension.toml"),
            "[build]\nwatch = [\"src/**/*.rs\"]\n",
        );
        write(&root.join("ui/banner/banner.extension.toml"), "");
        write(&root.join("ui/node_modules/pkg/pkg.extension.toml"), "");

        let registry = AppRegistry::load(root, &WatchConfig::default()).unwrap();
        let root = std::fs::canonicalize(root).unwrap();

        assert_eq!(
            registry.project.extension_roots,
            vec![root.join("ui"), root.join("functions")]
        );
        assert_eq!(
            registry.extension_directories(),
            vec![root.join("ui/banner"), root.join("functions/discount")]
        );
        let discount = registry.extension(&root.join("functions/discount")).unwrap();
        assert_eq!(discount.watch_paths, Some(vec!["src/**/*.rs".to_string()]));
    }

    #[test]
    fn test_load_without_app_config_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppRegistry::load(temp_dir.path(), &WatchConfig::default());
        assert!(matches!(result, Err(WatchError::Registry(_))));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("extensions"), PathBuf::from("extensions"));
        assert_eq!(literal_prefix("extensions/*"), PathBuf::from("extensions"));
        assert_eq!(literal_prefix("./apps/ext/**"), PathBuf::from("apps/ext"));
    }

    #[test]
    fn test_watch_roots_start_with_config() {
        let project = WatchedProject::new(
            PathBuf::from("/app"),
            PathBuf::from("/app/shopify.app.toml"),
            vec![PathBuf::from("/app/extensions")],
        );
        assert_eq!(
            project.watch_roots(),
            vec![PathBuf::from("/app/shopify.app.toml"), PathBuf::from("/app/extensions")]
        );
    }
}
