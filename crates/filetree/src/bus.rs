//! Debounced delivery of change notifications.
//!
//! Dirty directory marks accumulate in a pending set; a trailing timer
//! drains the set into its minimal cover and emits one
//! [`TreeEvent::Update`] per surviving path, followed by
//! [`TreeEvent::UpdateAll`] when a rescan requested it. Delivery is a
//! broadcast channel; the [`UpdateSubscriber`] trait adapts it for
//! callback-style consumers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::paths;

/// Window of the trailing drain timer.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(100);

const CHANNEL_CAPACITY: usize = 256;

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// The named directory (or something below it) changed.
    Update(String),
    /// The whole tree was rescanned.
    UpdateAll,
}

/// Callback-style consumer of tree events; see [`UpdateBus::attach`].
pub trait UpdateSubscriber: Send + Sync + 'static {
    fn on_update(&self, dir: &str);
    fn on_update_all(&self);
}

struct BusInner {
    pending: Mutex<HashSet<String>>,
    all_pending: AtomicBool,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    window: Duration,
    sender: broadcast::Sender<TreeEvent>,
}

#[derive(Clone)]
pub struct UpdateBus {
    inner: Arc<BusInner>,
}

impl UpdateBus {
    pub fn new(window: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                pending: Mutex::new(HashSet::new()),
                all_pending: AtomicBool::new(false),
                timer: Mutex::new(None),
                window,
                sender,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.inner.sender.subscribe()
    }

    /// Marks a directory dirty and (re)arms the drain timer.
    ///
    /// Must be called within a Tokio runtime.
    pub fn mark(&self, dir: String) {
        self.inner.pending.lock().insert(dir);
        self.arm();
    }

    /// Requests an `UpdateAll` emission after the next drain.
    pub fn mark_all(&self) {
        self.inner.all_pending.store(true, Ordering::Relaxed);
        self.arm();
    }

    fn arm(&self) {
        let mut slot = self.inner.timer.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let bus = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(bus.inner.window).await;
            bus.drain();
        }));
    }

    /// Takes and clears the pending set, then emits the minimal cover.
    pub fn drain(&self) {
        let pending: Vec<String> = {
            let mut guard = self.inner.pending.lock();
            guard.drain().collect()
        };
        let emit_all = self.inner.all_pending.swap(false, Ordering::Relaxed);
        for path in minimal_cover(pending) {
            let _ = self.inner.sender.send(TreeEvent::Update(path));
        }
        if emit_all {
            let _ = self.inner.sender.send(TreeEvent::UpdateAll);
        }
    }

    /// Forwards events to a callback-style subscriber until the bus is
    /// dropped or the subscriber's task is aborted.
    pub fn attach(&self, subscriber: Arc<dyn UpdateSubscriber>) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(TreeEvent::Update(dir)) => subscriber.on_update(&dir),
                    Ok(TreeEvent::UpdateAll) => subscriber.on_update_all(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "subscriber lagged behind update bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Reduces a dirty set to the smallest set of paths covering every member:
/// sort by depth ascending, drop strict descendants of already-selected
/// paths, deduplicate.
fn minimal_cover(mut paths_in: Vec<String>) -> Vec<String> {
    if paths_in.len() <= 1 {
        return paths_in;
    }
    paths_in.sort_by(|a, b| paths::depth(a).cmp(&paths::depth(b)).then_with(|| a.cmp(b)));
    paths_in.dedup();

    let mut selected: Vec<String> = Vec::with_capacity(paths_in.len());
    let mut selected_set: HashSet<String> = HashSet::with_capacity(paths_in.len());
    for path in paths_in {
        if has_selected_ancestor(&path, &selected_set) {
            continue;
        }
        selected_set.insert(path.clone());
        selected.push(path);
    }
    selected
}

fn has_selected_ancestor(path: &str, selected: &HashSet<String>) -> bool {
    if selected.is_empty() {
        return false;
    }
    let mut ancestor = paths::parent_of(path);
    loop {
        if selected.contains(&ancestor) {
            return true;
        }
        if ancestor == "/" {
            return false;
        }
        ancestor = paths::parent_of(&ancestor);
    }
}
