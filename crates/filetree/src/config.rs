use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::error::{FsError, Result};

fn default_follow_symlinks() -> bool {
    true
}

/// Configuration for a [`FileTree`](crate::FileTree).
///
/// Only `root` is required; everything else has a default suited to a
/// kernel-event watcher over an unfiltered tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeConfig {
    /// Real directory exposed as the virtual `/`.
    pub root: PathBuf,

    /// When set, the watcher polls at this interval in milliseconds
    /// instead of using kernel events.
    #[serde(default)]
    pub polling_interval: Option<u64>,

    /// Glob patterns excluded from the index. Matched against the
    /// root-relative virtual path and against the entry name.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Whether traversal follows symlinks. Non-followed symlinks are
    /// absent from the index.
    #[serde(default = "default_follow_symlinks")]
    pub follow_symlinks: bool,

    /// Rejects every mutation before it touches disk.
    #[serde(default)]
    pub read_only: bool,
}

impl TreeConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            polling_interval: None,
            ignore_patterns: Vec::new(),
            follow_symlinks: default_follow_symlinks(),
            read_only: false,
        }
    }

    /// Compiles `ignore_patterns` into a matcher.
    pub fn build_ignore_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_patterns {
            let glob = Glob::new(pattern)
                .map_err(|error| FsError::Invalid(format!("ignore pattern {pattern:?}: {error}")))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|error| FsError::Invalid(format!("ignore patterns: {error}")))
    }
}
