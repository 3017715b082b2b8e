//! The in-memory index: one [`DirEntry`] per directory, keyed by virtual
//! path.
//!
//! Store primitives patch the map locally; [`IndexState::recompute_sizes`]
//! is the only authoritative size computation and tolerates arbitrary
//! prior drift. Primitives never perform I/O and never suspend, so
//! callers may run them under a lock.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::paths;

/// One regular file. Sizes are bytes, times are milliseconds since epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub size: u64,
    pub mtime: u64,
}

/// One directory: its direct files, its rolled-up size (including
/// recursive subdirectory sizes), and its mtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub files: HashMap<String, FileEntry>,
    pub size: u64,
    pub mtime: u64,
}

/// Serialized listing: display name to `"<kind>|<mtime-seconds>|<size>"`.
pub type Entries = HashMap<String, String>;

/// A name/size/mtime triple carrying its full virtual path, used to feed
/// [`entries`].
#[derive(Debug, Clone)]
pub struct EntryRef {
    pub path: String,
    pub size: u64,
    pub mtime: u64,
}

/// The process-wide mapping from virtual directory path to [`DirEntry`].
#[derive(Debug, Default)]
pub struct IndexState {
    dirs: HashMap<String, DirEntry>,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl IndexState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.dirs.contains_key(path)
    }

    pub(crate) fn get(&self, path: &str) -> Option<&DirEntry> {
        self.dirs.get(path)
    }

    /// Snapshot of the entry at `path`; callers never receive references
    /// into the index.
    pub fn snapshot(&self, path: &str) -> Option<DirEntry> {
        self.dirs.get(path).cloned()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &DirEntry)> {
        self.dirs.iter()
    }

    /// Inserts or replaces a directory with empty files and zero size.
    pub fn put_dir(&mut self, path: &str, mtime: u64) {
        self.dirs.insert(
            path.to_string(),
            DirEntry {
                files: HashMap::new(),
                size: 0,
                mtime,
            },
        );
    }

    /// Inserts or overwrites a file, adjusting only the owning
    /// directory's size; the rollup pass fixes ancestors.
    pub fn put_file(&mut self, dir: &str, name: &str, size: u64, mtime: u64) {
        let Some(entry) = self.dirs.get_mut(dir) else {
            return;
        };
        if let Some(previous) = entry.files.insert(name.to_string(), FileEntry { size, mtime }) {
            entry.size = entry.size.saturating_sub(previous.size);
        }
        entry.size += size;
    }

    /// Removes a file, subtracting its size locally.
    pub fn remove_file(&mut self, dir: &str, name: &str) -> Option<FileEntry> {
        let entry = self.dirs.get_mut(dir)?;
        let removed = entry.files.remove(name)?;
        entry.size = entry.size.saturating_sub(removed.size);
        Some(removed)
    }

    /// Removes `path` and every entry below it.
    pub fn remove_dir(&mut self, path: &str) {
        self.dirs
            .retain(|key, _| key != path && !paths::is_descendant(key, path));
    }

    /// Relocates `from` and every descendant by prefix substitution.
    pub fn rekey_subtree(&mut self, from: &str, to: &str) {
        let moved: Vec<String> = self
            .dirs
            .keys()
            .filter(|key| *key == from || paths::is_descendant(key, from))
            .cloned()
            .collect();
        for key in moved {
            if let Some(entry) = self.dirs.remove(&key) {
                let rekeyed = format!("{to}{}", &key[from.len()..]);
                self.dirs.insert(rekeyed, entry);
            }
        }
    }

    /// Clones `from` and every descendant under `to`, stamping every
    /// directory and file with `mtime`.
    pub fn clone_subtree(&mut self, from: &str, to: &str, mtime: u64) {
        let cloned: Vec<(String, DirEntry)> = self
            .dirs
            .iter()
            .filter(|(key, _)| *key == from || paths::is_descendant(key, from))
            .map(|(key, entry)| {
                let mut copy = entry.clone();
                copy.mtime = mtime;
                for file in copy.files.values_mut() {
                    file.mtime = mtime;
                }
                (format!("{to}{}", &key[from.len()..]), copy)
            })
            .collect();
        for (key, entry) in cloned {
            self.dirs.insert(key, entry);
        }
    }

    /// The only authoritative size computation: reset every directory to
    /// the sum of its own files, then fold sizes into parents in
    /// descending depth order. Idempotent; tolerates arbitrary drift.
    pub fn recompute_sizes(&mut self) {
        let mut keys: Vec<String> = self.dirs.keys().cloned().collect();
        keys.sort_by(|a, b| paths::depth(b).cmp(&paths::depth(a)).then_with(|| a.cmp(b)));

        for key in &keys {
            if let Some(entry) = self.dirs.get_mut(key) {
                entry.size = entry.files.values().map(|f| f.size).sum();
            }
        }
        for key in &keys {
            if key == "/" {
                continue;
            }
            let size = match self.dirs.get(key) {
                Some(entry) => entry.size,
                None => continue,
            };
            let parent = paths::parent_of(key);
            if let Some(parent_entry) = self.dirs.get_mut(&parent) {
                parent_entry.size += size;
            }
        }
    }
}

fn entry_line(kind: char, mtime: u64, size: u64) -> String {
    format!("{kind}|{}|{size}", mtime / 1000)
}

fn display_name(path: &str, relative_base: Option<&str>) -> String {
    match relative_base {
        Some("/") => path.trim_start_matches('/').to_string(),
        Some(base) => path
            .strip_prefix(base)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| paths::basename(path).to_string()),
        None => paths::basename(path).to_string(),
    }
}

/// Serializes files and folders into the wire mapping from display name
/// to `"<kind>|<mtime-seconds>|<size>"`. With `relative_base`, display
/// names are paths relative to that base (used by search).
pub fn entries(files: &[EntryRef], folders: &[EntryRef], relative_base: Option<&str>) -> Entries {
    let mut out = Entries::with_capacity(files.len() + folders.len());
    for folder in folders {
        out.insert(
            display_name(&folder.path, relative_base),
            entry_line('d', folder.mtime, folder.size),
        );
    }
    for file in files {
        out.insert(
            display_name(&file.path, relative_base),
            entry_line('f', file.mtime, file.size),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> IndexState {
        // /a/f1 (10), /a/b/f2 (20), /c/f3 (5)
        let mut state = IndexState::new();
        state.put_dir("/", 1_000);
        state.put_dir("/a", 1_000);
        state.put_dir("/a/b", 1_000);
        state.put_dir("/c", 1_000);
        state.put_file("/a", "f1", 10, 2_000);
        state.put_file("/a/b", "f2", 20, 2_000);
        state.put_file("/c", "f3", 5, 2_000);
        state.recompute_sizes();
        state
    }

    #[test]
    fn rollup_sums_files_and_children() {
        let state = seeded();
        assert_eq!(state.snapshot("/").unwrap().size, 35);
        assert_eq!(state.snapshot("/a").unwrap().size, 30);
        assert_eq!(state.snapshot("/a/b").unwrap().size, 20);
        assert_eq!(state.snapshot("/c").unwrap().size, 5);
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut state = seeded();
        state.recompute_sizes();
        assert_eq!(state.snapshot("/").unwrap().size, 35);
        assert_eq!(state.snapshot("/a").unwrap().size, 30);
    }

    #[test]
    fn recompute_repairs_drift() {
        let mut state = seeded();
        state.dirs.get_mut("/a").unwrap().size = 9_999;
        state.dirs.get_mut("/").unwrap().size = 1;
        state.recompute_sizes();
        assert_eq!(state.snapshot("/a").unwrap().size, 30);
        assert_eq!(state.snapshot("/").unwrap().size, 35);
    }

    #[test]
    fn put_file_overwrite_replaces_size() {
        let mut state = seeded();
        state.put_file("/a", "f1", 15, 3_000);
        state.recompute_sizes();
        assert_eq!(state.snapshot("/a").unwrap().size, 35);
        assert_eq!(state.snapshot("/").unwrap().size, 40);
    }

    #[test]
    fn remove_file_subtracts() {
        let mut state = seeded();
        let removed = state.remove_file("/a", "f1").unwrap();
        assert_eq!(removed.size, 10);
        state.recompute_sizes();
        assert_eq!(state.snapshot("/").unwrap().size, 25);
        assert!(state.remove_file("/a", "f1").is_none());
    }

    #[test]
    fn remove_dir_drops_subtree() {
        let mut state = seeded();
        state.remove_dir("/a");
        assert!(!state.contains("/a"));
        assert!(!state.contains("/a/b"));
        assert!(state.contains("/c"));
        state.recompute_sizes();
        assert_eq!(state.snapshot("/").unwrap().size, 5);
    }

    #[test]
    fn rekey_moves_subtree() {
        let mut state = seeded();
        state.rekey_subtree("/a/b", "/c/b");
        assert!(!state.contains("/a/b"));
        assert!(state.contains("/c/b"));
        assert_eq!(state.snapshot("/c/b").unwrap().files["f2"].size, 20);
        state.recompute_sizes();
        assert_eq!(state.snapshot("/a").unwrap().size, 10);
        assert_eq!(state.snapshot("/c").unwrap().size, 25);
        assert_eq!(state.snapshot("/").unwrap().size, 35);
    }

    #[test]
    fn rekey_does_not_touch_similar_prefixes() {
        let mut state = seeded();
        state.put_dir("/ab", 1_000);
        state.rekey_subtree("/a", "/z");
        assert!(state.contains("/ab"));
        assert!(state.contains("/z"));
        assert!(state.contains("/z/b"));
    }

    #[test]
    fn clone_subtree_stamps_mtime() {
        let mut state = seeded();
        state.clone_subtree("/a", "/a2", 7_000);
        state.recompute_sizes();
        let copy = state.snapshot("/a2").unwrap();
        assert_eq!(copy.mtime, 7_000);
        assert_eq!(copy.files["f1"].mtime, 7_000);
        assert_eq!(copy.size, 30);
        assert!(state.contains("/a2/b"));
        // Source untouched.
        assert_eq!(state.snapshot("/a").unwrap().files["f1"].mtime, 2_000);
    }

    #[test]
    fn entries_wire_format() {
        let files = vec![EntryRef {
            path: "/a/f1".into(),
            size: 10,
            mtime: 2_000,
        }];
        let folders = vec![EntryRef {
            path: "/a/b".into(),
            size: 20,
            mtime: 1_000,
        }];
        let out = entries(&files, &folders, None);
        assert_eq!(out["f1"], "f|2|10");
        assert_eq!(out["b"], "d|1|20");
    }

    #[test]
    fn entries_relative_base() {
        let files = vec![EntryRef {
            path: "/a/b/f2".into(),
            size: 20,
            mtime: 2_000,
        }];
        let out = entries(&files, &[], Some("/a"));
        assert_eq!(out["b/f2"], "f|2|20");
    }
}
