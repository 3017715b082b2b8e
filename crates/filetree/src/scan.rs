//! Recursive traversal of the real filesystem.
//!
//! Two variants share one result shape: the synchronous walk used for the
//! initial population (throughput) and the asynchronous walk used by
//! watcher-driven rescans. Both honor the ignore set and symlink policy,
//! and both swallow per-entry errors so one unreadable subdirectory never
//! aborts a rescan.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use globset::GlobSet;
use walkdir::WalkDir;

use crate::fsops;
use crate::paths;
use crate::store::IndexState;

/// Traversal results partitioned into directories and files, all in
/// virtual-path form.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// `(virtual dir path, mtime-millis)`.
    pub dirs: Vec<(String, u64)>,
    /// `(parent virtual dir, file name, size, mtime-millis)`.
    pub files: Vec<(String, String, u64, u64)>,
}

pub(crate) fn is_ignored(ignore: &GlobSet, virtual_path: &str) -> bool {
    if virtual_path == "/" || ignore.is_empty() {
        return false;
    }
    ignore.is_match(virtual_path.trim_start_matches('/'))
        || ignore.is_match(paths::basename(virtual_path))
}

/// Synchronous full walk below `root`, used for the initial population.
pub fn scan_sync(root: &Path, ignore: &GlobSet, follow_symlinks: bool) -> ScanResult {
    let mut result = ScanResult::default();
    let walker = WalkDir::new(root).follow_links(follow_symlinks);
    let iter = walker.into_iter().filter_entry(|entry| {
        entry.depth() == 0 || !is_ignored(ignore, &paths::to_virtual(root, entry.path()))
    });
    for entry in iter {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(%error, "scan: skipping unreadable entry");
                continue;
            }
        };
        if !follow_symlinks && entry.path_is_symlink() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), %error, "scan: stat failed");
                continue;
            }
        };
        let virtual_path = paths::to_virtual(root, entry.path());
        let mtime = fsops::mtime_millis(&metadata);
        if metadata.is_dir() {
            result.dirs.push((virtual_path, mtime));
        } else if metadata.is_file() {
            let parent = paths::parent_of(&virtual_path);
            let name = paths::basename(&virtual_path).to_string();
            result.files.push((parent, name, metadata.len(), mtime));
        }
    }
    result
}

/// Asynchronous full walk below `root`, used by watcher-driven rescans.
pub async fn scan_async(root: &Path, ignore: &GlobSet, follow_symlinks: bool) -> ScanResult {
    let mut result = ScanResult::default();
    match fsops::stat(root).await {
        Ok(metadata) if metadata.is_dir() => {
            result.dirs.push(("/".to_string(), fsops::mtime_millis(&metadata)));
            walk_async(
                "/".to_string(),
                root.to_path_buf(),
                ignore.clone(),
                follow_symlinks,
            )
            .walk(&mut result)
            .await;
        }
        Ok(_) | Err(_) => {
            tracing::warn!(root = %root.display(), "rescan: root is not a readable directory");
        }
    }
    result
}

struct AsyncWalk {
    virtual_dir: String,
    real_dir: PathBuf,
    ignore: GlobSet,
    follow_symlinks: bool,
}

fn walk_async(
    virtual_dir: String,
    real_dir: PathBuf,
    ignore: GlobSet,
    follow_symlinks: bool,
) -> AsyncWalk {
    AsyncWalk {
        virtual_dir,
        real_dir,
        ignore,
        follow_symlinks,
    }
}

impl AsyncWalk {
    fn walk<'a>(
        self,
        result: &'a mut ScanResult,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut reader = match tokio::fs::read_dir(&self.real_dir).await {
                Ok(reader) => reader,
                Err(error) => {
                    tracing::warn!(path = %self.real_dir.display(), %error, "rescan: read_dir failed");
                    return;
                }
            };
            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(path = %self.real_dir.display(), %error, "rescan: entry read failed");
                        break;
                    }
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                let virtual_path = paths::join(&self.virtual_dir, &paths::normalize(&name)[1..]);
                if is_ignored(&self.ignore, &virtual_path) {
                    continue;
                }
                let metadata = if self.follow_symlinks {
                    tokio::fs::metadata(entry.path()).await
                } else {
                    entry.metadata().await
                };
                let metadata = match metadata {
                    Ok(metadata) => metadata,
                    Err(error) => {
                        tracing::warn!(path = %entry.path().display(), %error, "rescan: stat failed");
                        continue;
                    }
                };
                if !self.follow_symlinks && metadata.is_symlink() {
                    continue;
                }
                let mtime = fsops::mtime_millis(&metadata);
                if metadata.is_dir() {
                    result.dirs.push((virtual_path.clone(), mtime));
                    walk_async(
                        virtual_path,
                        entry.path(),
                        self.ignore.clone(),
                        self.follow_symlinks,
                    )
                    .walk(result)
                    .await;
                } else if metadata.is_file() {
                    result
                        .files
                        .push((self.virtual_dir.clone(), name, metadata.len(), mtime));
                }
            }
        })
    }
}

/// Replaces the `scan_root` subtree of the index with `result`.
///
/// Every discovered directory gets a fresh entry, files are rewritten
/// under their parents, and directories previously under `scan_root` that
/// the walk no longer reports are deleted. The caller runs the size
/// rollup afterwards.
pub fn apply(state: &mut IndexState, scan_root: &str, result: &ScanResult) {
    let fresh: HashSet<&str> = result.dirs.iter().map(|(path, _)| path.as_str()).collect();

    let stale: Vec<String> = state
        .iter()
        .map(|(path, _)| path.clone())
        .filter(|path| {
            (path == scan_root || paths::is_descendant(path, scan_root))
                && !fresh.contains(path.as_str())
        })
        .collect();
    for path in stale {
        state.remove_dir(&path);
    }

    for (path, mtime) in &result.dirs {
        state.put_dir(path, *mtime);
    }
    for (dir, name, size, mtime) in &result.files {
        state.put_file(dir, name, *size, *mtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use std::fs;
    use tempfile::TempDir;

    fn seed_disk(temp: &TempDir) {
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::create_dir_all(temp.path().join("c")).unwrap();
        fs::write(temp.path().join("a/f1"), vec![0u8; 10]).unwrap();
        fs::write(temp.path().join("a/b/f2"), vec![0u8; 20]).unwrap();
        fs::write(temp.path().join("c/f3"), vec![0u8; 5]).unwrap();
    }

    fn empty_ignore() -> GlobSet {
        TreeConfig::new("/").build_ignore_set().unwrap()
    }

    fn populated(temp: &TempDir) -> IndexState {
        let result = scan_sync(temp.path(), &empty_ignore(), true);
        let mut state = IndexState::new();
        apply(&mut state, "/", &result);
        state.recompute_sizes();
        state
    }

    #[test]
    fn sync_scan_partitions_dirs_and_files() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let state = populated(&temp);
        assert_eq!(state.len(), 4);
        assert_eq!(state.snapshot("/").unwrap().size, 35);
        assert_eq!(state.snapshot("/a").unwrap().size, 30);
        assert_eq!(state.snapshot("/a/b").unwrap().files["f2"].size, 20);
    }

    #[test]
    fn sync_scan_honors_ignore_patterns() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        fs::create_dir_all(temp.path().join(".git/objects")).unwrap();
        fs::write(temp.path().join("a/junk.tmp"), b"x").unwrap();
        let mut cfg = TreeConfig::new(temp.path());
        cfg.ignore_patterns = vec![".git".into(), "*.tmp".into()];
        let ignore = cfg.build_ignore_set().unwrap();

        let result = scan_sync(temp.path(), &ignore, true);
        let mut state = IndexState::new();
        apply(&mut state, "/", &result);
        assert!(!state.contains("/.git"));
        assert!(!state.contains("/.git/objects"));
        assert!(!state.snapshot("/a").unwrap().files.contains_key("junk.tmp"));
        assert!(state.snapshot("/a").unwrap().files.contains_key("f1"));
    }

    #[tokio::test]
    async fn async_scan_matches_sync_scan() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let ignore = empty_ignore();

        let sync_result = scan_sync(temp.path(), &ignore, true);
        let async_result = scan_async(temp.path(), &ignore, true).await;

        let mut sync_dirs: Vec<&String> = sync_result.dirs.iter().map(|(p, _)| p).collect();
        let mut async_dirs: Vec<&String> = async_result.dirs.iter().map(|(p, _)| p).collect();
        sync_dirs.sort();
        async_dirs.sort();
        assert_eq!(sync_dirs, async_dirs);
        assert_eq!(sync_result.files.len(), async_result.files.len());
    }

    #[tokio::test]
    async fn apply_prunes_vanished_directories() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        let ignore = empty_ignore();
        let mut state = populated(&temp);

        fs::remove_dir_all(temp.path().join("a/b")).unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();
        let rescan = scan_async(temp.path(), &ignore, true).await;
        apply(&mut state, "/", &rescan);
        state.recompute_sizes();

        assert!(!state.contains("/a/b"));
        assert!(state.contains("/d"));
        assert_eq!(state.snapshot("/").unwrap().size, 15);
    }

    #[test]
    fn scan_skips_symlinks_when_not_following() {
        let temp = TempDir::new().unwrap();
        seed_disk(&temp);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(temp.path().join("a"), temp.path().join("link")).unwrap();
            let result = scan_sync(temp.path(), &empty_ignore(), false);
            assert!(!result.dirs.iter().any(|(p, _)| p == "/link"));
        }
    }
}
