//! Filesystem watching, rescan debouncing, and the suppression window.
//!
//! Watcher callbacks run on notify's thread and only funnel pulses into a
//! channel; a single consumer task applies the trailing debounce and the
//! suppression gate before running a full rescan. Events arriving while
//! suppression is active are discarded, not queued: the mutation engine
//! has already patched the index for its own writes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::GlobSet;
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::{FsError, Result};
use crate::paths;
use crate::scan;
use crate::tree::FileTree;

/// How long watcher-driven rescans stay disabled after a self-mutation.
pub const SUPPRESSION_WINDOW: Duration = Duration::from_millis(3_000);

/// Trailing debounce applied to watcher event bursts.
pub const RESCAN_DEBOUNCE: Duration = Duration::from_millis(100);

/// A deadline before which watcher-driven rescans are disabled.
///
/// [`look_away`](Suppression::look_away) re-arms the full window; the
/// timer is not cancellable.
pub struct Suppression {
    deadline: Mutex<Option<Instant>>,
    window: Duration,
}

impl Suppression {
    pub fn new(window: Duration) -> Self {
        Self {
            deadline: Mutex::new(None),
            window,
        }
    }

    pub fn look_away(&self) {
        *self.deadline.lock() = Some(Instant::now() + self.window);
    }

    pub fn active(&self) -> bool {
        self.deadline
            .lock()
            .map_or(false, |deadline| Instant::now() < deadline)
    }
}

/// Keeps whichever notify backend is in use alive.
pub(crate) enum WatcherHandle {
    Kernel(RecommendedWatcher),
    Poll(PollWatcher),
}

fn pulse_on_event(
    root: PathBuf,
    ignore: GlobSet,
    tx: UnboundedSender<()>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |outcome| match outcome {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let all_ignored = !event.paths.is_empty()
                && event
                    .paths
                    .iter()
                    .all(|path| scan::is_ignored(&ignore, &paths::to_virtual(&root, path)));
            if all_ignored {
                return;
            }
            let _ = tx.send(());
        }
        Err(error) => {
            tracing::warn!(%error, "filesystem watcher error");
            let _ = tx.send(());
        }
    }
}

/// Creates a recursive watcher on `root`: kernel events by default, or a
/// poll watcher when `polling_interval` (ms) is set.
pub(crate) fn create_watcher(
    root: &Path,
    ignore: &GlobSet,
    polling_interval: Option<u64>,
    tx: UnboundedSender<()>,
) -> Result<WatcherHandle> {
    let handler = pulse_on_event(root.to_path_buf(), ignore.clone(), tx);
    let mut handle = match polling_interval {
        Some(millis) => {
            let config =
                notify::Config::default().with_poll_interval(Duration::from_millis(millis));
            WatcherHandle::Poll(
                PollWatcher::new(handler, config).map_err(|error| watch_failure(root, error))?,
            )
        }
        None => WatcherHandle::Kernel(
            notify::recommended_watcher(handler).map_err(|error| watch_failure(root, error))?,
        ),
    };
    match &mut handle {
        WatcherHandle::Kernel(watcher) => watcher.watch(root, RecursiveMode::Recursive),
        WatcherHandle::Poll(watcher) => watcher.watch(root, RecursiveMode::Recursive),
    }
    .map_err(|error| watch_failure(root, error))?;
    Ok(handle)
}

fn watch_failure(root: &Path, error: notify::Error) -> FsError {
    tracing::warn!(root = %root.display(), %error, "failed to start filesystem watcher");
    FsError::Io(std::io::Error::other(error.to_string()))
}

/// Single consumer of watcher pulses: debounce, gate on suppression, then
/// run one coalesced full rescan.
pub(crate) async fn pump(tree: FileTree, mut rx: UnboundedReceiver<()>, window: Duration) {
    while rx.recv().await.is_some() {
        if tree.suppression().active() {
            continue;
        }
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if tree.suppression().active() {
            continue;
        }
        tree.rescan().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[test]
    fn suppression_starts_inactive() {
        let suppression = Suppression::new(Duration::from_millis(100));
        assert!(!suppression.active());
    }

    #[test]
    fn look_away_arms_and_expires() {
        let suppression = Suppression::new(Duration::from_millis(50));
        suppression.look_away();
        assert!(suppression.active());
        std::thread::sleep(Duration::from_millis(80));
        assert!(!suppression.active());
    }

    #[test]
    fn look_away_rearms_the_deadline() {
        let suppression = Suppression::new(Duration::from_millis(60));
        suppression.look_away();
        std::thread::sleep(Duration::from_millis(40));
        suppression.look_away();
        std::thread::sleep(Duration::from_millis(40));
        // Second arm keeps the window open past the first deadline.
        assert!(suppression.active());
    }

    #[tokio::test]
    async fn pump_discards_suppressed_pulses() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), b"1234").unwrap();
        let tree = FileTree::init(TreeConfig::new(temp.path())).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump_task = tokio::spawn(pump(
            tree.clone(),
            rx,
            Duration::from_millis(20),
        ));

        // An out-of-band change lands while the engine is "looking away".
        tree.suppression().look_away();
        std::fs::write(temp.path().join("f"), b"123456789").unwrap();
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // No rescan ran, so the index still reports the old size.
        assert_eq!(tree.dir("/").unwrap().files["f"].size, 4);

        drop(tx);
        pump_task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_rescans_after_quiet_window() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), b"1234").unwrap();
        let tree = FileTree::init(TreeConfig::new(temp.path())).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump_task = tokio::spawn(pump(
            tree.clone(),
            rx,
            Duration::from_millis(20),
        ));

        std::fs::write(temp.path().join("f"), b"123456789").unwrap();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(tree.dir("/").unwrap().files["f"].size, 9);

        drop(tx);
        pump_task.await.unwrap();
    }
}
