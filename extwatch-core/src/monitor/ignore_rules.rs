//! Per-extension ignore rules built from each extension's ignore file

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Compile the ignore file in `directory` into a matcher.
///
/// Returns `None` when the file is absent: nothing is excluded.
pub fn build_matcher(directory: &Path, ignore_file: &str) -> Option<Gitignore> {
    let ignore_path = directory.join(ignore_file);
    let content = match std::fs::read_to_string(&ignore_path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not read {:?}: {}", ignore_path, e);
            }
            return None;
        }
    };

    let mut builder = GitignoreBuilder::new(directory);
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Err(e) = builder.add_line(None, line) {
            warn!("Skipping invalid pattern {:?} in {:?}: {}", line, ignore_path, e);
        }
    }

    match builder.build() {
        Ok(gitignore) => {
            debug!("Loaded {} ignore pattern(s) for {:?}", gitignore.num_ignores(), directory);
            Some(gitignore)
        }
        Err(e) => {
            warn!("Failed to build ignore rules for {:?}: {}", directory, e);
            None
        }
    }
}

/// Extension directory → optional ignore matcher.
///
/// Entries for deleted extensions stay behind; nothing queries them again.
#[derive(Debug)]
pub struct IgnoreIndex {
    ignore_file: String,
    matchers: HashMap<PathBuf, Option<Gitignore>>,
}

impl IgnoreIndex {
    pub fn new(ignore_file: impl Into<String>) -> Self {
        Self { ignore_file: ignore_file.into(), matchers: HashMap::new() }
    }

    /// Build an index for every directory in `directories`
    pub fn build<'a>(
        ignore_file: impl Into<String>,
        directories: impl IntoIterator<Item = &'a PathBuf>,
    ) -> Self {
        let mut index = Self::new(ignore_file);
        for directory in directories {
            index.refresh(directory);
        }
        index
    }

    /// (Re)read the ignore file of `directory`
    pub fn refresh(&mut self, directory: &Path) {
        let matcher = build_matcher(directory, &self.ignore_file);
        self.matchers.insert(directory.to_path_buf(), matcher);
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.matchers.contains_key(directory)
    }

    /// Whether `path` is excluded by the rules of `extension_dir`
    pub fn is_ignored(&self, extension_dir: &Path, path: &Path) -> bool {
        let Some(Some(matcher)) = self.matchers.get(extension_dir) else {
            return false;
        };
        let Ok(relative) = path.strip_prefix(extension_dir) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        matcher.matched_path_or_any_parents(relative, false).is_ignore()
    }
}
