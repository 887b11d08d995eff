//! Error types for the watch engine

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Reported on the session error channel when a scaffolding lock file
    /// never went away. The session keeps running.
    #[error("Error loading new extension at path: {}.\n Please restart the process.", manifest.display())]
    ExtensionCreationTimeout { manifest: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid ignore pattern: {0}")]
    Ignore(#[from] ignore::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_restart() {
        let err = WatchError::ExtensionCreationTimeout {
            manifest: PathBuf::from("/app/extensions/foo/foo.extension.toml"),
        };
        let message = err.to_string();
        assert!(message.contains("/app/extensions/foo/foo.extension.toml"));
        assert!(message.contains("Please restart the process."));
    }
}
