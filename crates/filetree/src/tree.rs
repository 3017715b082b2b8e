//! The long-lived tree value owning the index and its collaborators.
//!
//! One `FileTree` exists per served root. It owns the config, the
//! readers-writer-guarded index, the update bus, the suppression
//! deadline, and (once [`watch`](FileTree::watch) is called) the
//! filesystem watcher. Mutations and rescans take the write lock only
//! for the in-memory patch; disk I/O always happens first, outside any
//! lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::GlobSet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::bus::{TreeEvent, UpdateBus, UpdateSubscriber, DRAIN_WINDOW};
use crate::config::TreeConfig;
use crate::error::{categorize, Result};
use crate::paths;
use crate::scan;
use crate::store::{DirEntry, IndexState};
use crate::watcher::{self, Suppression, WatcherHandle, RESCAN_DEBOUNCE, SUPPRESSION_WINDOW};

pub(crate) struct TreeInner {
    pub(crate) cfg: TreeConfig,
    pub(crate) root: PathBuf,
    pub(crate) ignore: GlobSet,
    pub(crate) state: RwLock<IndexState>,
    pub(crate) bus: UpdateBus,
    pub(crate) suppression: Suppression,
    watcher: Mutex<Option<WatcherHandle>>,
    last_error: Mutex<Option<String>>,
}

/// Handle to the in-memory file-tree index. Cheap to clone; all clones
/// share one index.
#[derive(Clone)]
pub struct FileTree {
    inner: Arc<TreeInner>,
}

impl FileTree {
    /// Builds the index with a one-shot synchronous scan of the root.
    ///
    /// The root must exist; it is canonicalized so later containment
    /// checks compare resolved paths.
    pub async fn init(cfg: TreeConfig) -> Result<Self> {
        let root = std::fs::canonicalize(&cfg.root)
            .map_err(|error| categorize(error, &cfg.root))?;
        let ignore = cfg.build_ignore_set()?;

        let scan_root = root.clone();
        let scan_ignore = ignore.clone();
        let follow = cfg.follow_symlinks;
        let result = tokio::task::spawn_blocking(move || {
            scan::scan_sync(&scan_root, &scan_ignore, follow)
        })
        .await
        .map_err(|error| crate::error::FsError::Io(std::io::Error::other(error)))?;

        let mut state = IndexState::new();
        scan::apply(&mut state, "/", &result);
        state.recompute_sizes();
        tracing::debug!(
            root = %root.display(),
            dirs = state.len(),
            "file tree initialized"
        );

        Ok(Self {
            inner: Arc::new(TreeInner {
                cfg,
                root,
                ignore,
                state: RwLock::new(state),
                bus: UpdateBus::new(DRAIN_WINDOW),
                suppression: Suppression::new(SUPPRESSION_WINDOW),
                watcher: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        })
    }

    /// Starts watching the root for out-of-band changes.
    ///
    /// Must be called within a Tokio runtime. Watcher failure leaves the
    /// tree serviceable; the error is returned, logged, and remembered in
    /// [`last_error`](FileTree::last_error).
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = match watcher::create_watcher(
            &self.inner.root,
            &self.inner.ignore,
            self.inner.cfg.polling_interval,
            tx,
        ) {
            Ok(handle) => handle,
            Err(error) => {
                *self.inner.last_error.lock() = Some(error.to_string());
                return Err(error);
            }
        };
        *self.inner.watcher.lock() = Some(handle);
        tokio::spawn(watcher::pump(self.clone(), rx, RESCAN_DEBOUNCE));
        Ok(())
    }

    /// Most recent watcher failure, kept for status reporting; `None`
    /// while the watcher has never failed.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Stream of [`TreeEvent`]s emitted by the update bus.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.inner.bus.subscribe()
    }

    /// Forwards events to a callback-style subscriber.
    pub fn attach(&self, subscriber: Arc<dyn UpdateSubscriber>) -> tokio::task::JoinHandle<()> {
        self.inner.bus.attach(subscriber)
    }

    /// The real directory served as `/`.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Snapshot of one directory entry; `None` when the path is not
    /// indexed.
    pub fn dir(&self, virtual_path: &str) -> Option<DirEntry> {
        let normalized = paths::normalize(virtual_path);
        self.inner.state.read().snapshot(&normalized)
    }

    /// Number of indexed directories.
    pub fn dir_count(&self) -> usize {
        self.inner.state.read().len()
    }

    /// Sorted snapshot of every indexed directory path.
    pub fn dir_paths(&self) -> Vec<String> {
        let state = self.inner.state.read();
        let mut paths: Vec<String> = state.iter().map(|(path, _)| path.clone()).collect();
        paths.sort();
        paths
    }

    /// Disables watcher-driven rescans for the suppression window,
    /// re-arming the deadline when already active.
    pub fn look_away(&self) {
        self.inner.suppression.look_away();
    }

    pub(crate) fn suppression(&self) -> &Suppression {
        &self.inner.suppression
    }

    pub(crate) fn inner(&self) -> &TreeInner {
        &self.inner
    }

    /// Maps a virtual path to its real counterpart, clamped to the root.
    pub fn real_path(&self, virtual_path: &str) -> PathBuf {
        paths::to_real(&self.inner.root, virtual_path)
    }

    /// Recomputes sizes and marks `dir` dirty on the bus.
    pub(crate) fn mark_dirty(&self, dir: &str) {
        self.inner.state.write().recompute_sizes();
        self.inner.bus.mark(dir.to_string());
    }

    /// Watcher-driven coalesced full rescan: async traversal, subtree
    /// replacement, size rollup, then `updateall` after the drain.
    pub(crate) async fn rescan(&self) {
        let result = scan::scan_async(
            &self.inner.root,
            &self.inner.ignore,
            self.inner.cfg.follow_symlinks,
        )
        .await;
        {
            let mut state = self.inner.state.write();
            scan::apply(&mut state, "/", &result);
            state.recompute_sizes();
        }
        tracing::debug!(dirs = self.dir_count(), "rescan applied");
        self.inner.bus.mark("/".to_string());
        self.inner.bus.mark_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seed_disk(temp: &TempDir) {
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::create_dir_all(temp.path().join("c")).unwrap();
        fs::write(temp.path().join("a/f1"), vec![0u8; 10]).unwrap();
        fs::write(temp.path().join("a/b/f2"), vec![0u8; 20]).unwrap();
        fs::write(temp.path().join("c/f3"), vec![0u8; 5]).unwrap();
    }

    #[tokio::test]
    async fn init_builds_rolled_up_index() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let tree = FileTree::init(TreeConfig::new(temp.path())).await.unwrap();

        assert_eq!(tree.dir_count(), 4);
        assert_eq!(tree.dir("/").unwrap().size, 35);
        assert_eq!(tree.dir("/a").unwrap().size, 30);
        assert_eq!(tree.dir("/c").unwrap().size, 5);
        assert!(tree.dir("/missing").is_none());
    }

    #[tokio::test]
    async fn init_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(FileTree::init(TreeConfig::new(&missing)).await.is_err());
    }

    #[tokio::test]
    async fn watch_failure_is_remembered() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let tree = FileTree::init(TreeConfig::new(temp.path())).await.unwrap();
        assert!(tree.last_error().is_none());

        // The root vanishes before the watcher starts.
        drop(temp);
        assert!(tree.watch().is_err());
        assert!(tree.last_error().is_some());

        // The index stays serviceable.
        assert_eq!(tree.dir("/").unwrap().size, 35);
    }

    #[tokio::test]
    async fn rescan_picks_up_external_changes() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let tree = FileTree::init(TreeConfig::new(temp.path())).await.unwrap();
        let mut rx = tree.subscribe();

        fs::write(temp.path().join("c/f4"), vec![0u8; 7]).unwrap();
        fs::remove_dir_all(temp.path().join("a/b")).unwrap();
        tree.rescan().await;

        assert_eq!(tree.dir("/c").unwrap().files["f4"].size, 7);
        assert!(tree.dir("/a/b").is_none());
        assert_eq!(tree.dir("/").unwrap().size, 22);

        // The drain emits the rescan root and then updateall.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, TreeEvent::Update("/".into()));
        assert_eq!(second, TreeEvent::UpdateAll);
    }
}
