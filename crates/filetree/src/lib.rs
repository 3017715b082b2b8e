//! In-memory file-tree index with filesystem watching and coalesced
//! update notifications.
//!
//! This crate mirrors a root directory as a map of virtual directory
//! paths to directory entries (files, rolled-up sizes, mtimes), applies
//! client-driven mutations with a strict disk-then-patch ordering,
//! rebuilds after out-of-band filesystem changes, and pushes debounced
//! per-directory notifications to subscribers.
//!
//! ## Architecture
//!
//! A single [`FileTree`] per root owns the index behind a
//! readers-writer lock: queries take shared access, mutation patches and
//! rescan batches take exclusive access, and disk I/O always happens
//! before the exclusive section. The watcher never mutates directly; it
//! funnels pulses through a debounced task that runs a full rescan,
//! gated by the suppression window the mutation engine arms before its
//! own writes.
//!
//! ## Module Structure
//!
//! - `paths` - Virtual path mapping, validation, ordering
//! - `fsops` - Categorized filesystem primitives
//! - `store` - The index map and its size rollup
//! - `scan` - Sync and async traversal
//! - `watcher` - notify integration, debounce, suppression
//! - `engine` - Mutations (mk, mkdir, del, save, mv, cp, clipboard)
//! - `bus` - Dirty-set coalescing and event delivery
//! - `query` - ls, filtered listing, search

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsops;
pub mod paths;
pub mod query;
pub mod scan;
pub mod store;
pub mod tree;
pub mod watcher;

pub use bus::{TreeEvent, UpdateBus, UpdateSubscriber};
pub use config::TreeConfig;
pub use engine::PasteKind;
pub use error::{FsError, Result};
pub use paths::{add_upload_suffix, strip_upload_suffix, UPLOAD_SUFFIX};
pub use store::{DirEntry, Entries, FileEntry, IndexState};
pub use tree::FileTree;
