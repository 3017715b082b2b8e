//! Read-side queries over the index.
//!
//! All queries take shared read access and return snapshots in the wire
//! shape of [`crate::store::entries`]; nothing here can observe a
//! half-applied mutation.

use regex::Regex;

use crate::error::{FsError, Result};
use crate::paths;
use crate::store::{self, Entries, EntryRef};
use crate::tree::FileTree;

impl FileTree {
    /// Lists the files directly in `path` plus its immediate child
    /// directories; `None` when `path` is not indexed.
    pub fn ls(&self, path: &str) -> Option<Entries> {
        let path = paths::normalize(path);
        let state = self.inner().state.read();
        let dir = state.get(&path)?;

        let files: Vec<EntryRef> = dir
            .files
            .iter()
            .map(|(name, file)| EntryRef {
                path: paths::join(&path, name),
                size: file.size,
                mtime: file.mtime,
            })
            .collect();
        let folders: Vec<EntryRef> = state
            .iter()
            .filter(|(candidate, _)| paths::is_direct_child(candidate, &path))
            .map(|(candidate, entry)| EntryRef {
                path: candidate.clone(),
                size: entry.size,
                mtime: entry.mtime,
            })
            .collect();
        Some(store::entries(&files, &folders, None))
    }

    /// Names of the files directly in `path` whose name matches
    /// `pattern`, in natural order.
    pub fn ls_filter(&self, path: &str, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern)
            .map_err(|error| FsError::Invalid(format!("filter pattern: {error}")))?;
        let path = paths::normalize(path);
        let state = self.inner().state.read();
        let Some(dir) = state.get(&path) else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = dir
            .files
            .keys()
            .filter(|name| regex.is_match(name))
            .cloned()
            .collect();
        names.sort_by(|a, b| paths::natural_cmp(a, b));
        Ok(names)
    }

    /// Case-insensitive substring search over every path strictly below
    /// `scope`. Matches are serialized relative to `scope`; `None` when
    /// nothing matched.
    pub fn search(&self, query: &str, scope: &str) -> Option<Entries> {
        let scope = paths::normalize(scope);
        let needle = query.to_lowercase();
        let state = self.inner().state.read();

        let mut files: Vec<EntryRef> = Vec::new();
        let mut folders: Vec<EntryRef> = Vec::new();
        for (dir_path, dir) in state.iter() {
            if paths::is_descendant(dir_path, &scope)
                && relative_to(dir_path, &scope).to_lowercase().contains(&needle)
            {
                folders.push(EntryRef {
                    path: dir_path.clone(),
                    size: dir.size,
                    mtime: dir.mtime,
                });
            }
            if *dir_path == scope || paths::is_descendant(dir_path, &scope) {
                for (name, file) in &dir.files {
                    let full = paths::join(dir_path, name);
                    if relative_to(&full, &scope).to_lowercase().contains(&needle) {
                        files.push(EntryRef {
                            path: full,
                            size: file.size,
                            mtime: file.mtime,
                        });
                    }
                }
            }
        }
        if files.is_empty() && folders.is_empty() {
            return None;
        }
        Some(store::entries(&files, &folders, Some(&scope)))
    }
}

fn relative_to<'a>(path: &'a str, scope: &str) -> &'a str {
    if scope == "/" {
        path.trim_start_matches('/')
    } else {
        path.strip_prefix(scope)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path)
    }
}
