//! Client-driven mutations.
//!
//! Every operation is the same thin composition: validate, `look_away`,
//! perform the disk step through the adapter, patch the index in memory,
//! mark the affected directories dirty. A failed disk step leaves the
//! index untouched; validation failures never reach disk.

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::fsops;
use crate::paths;
use crate::store::now_millis;
use crate::tree::FileTree;

/// Clipboard paste semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasteKind {
    Cut,
    Copy,
}

impl FileTree {
    fn writable(&self) -> Result<()> {
        if self.inner().cfg.read_only {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    fn sane(&self, raw: &str) -> Result<String> {
        let normalized = paths::normalize(raw);
        if !paths::is_path_sane(&normalized, false) {
            return Err(FsError::Invalid(format!("invalid path: {raw}")));
        }
        Ok(normalized)
    }

    /// Creates an empty file. Already-existing paths are left untouched.
    pub async fn mk(&self, path: &str) -> Result<()> {
        self.writable()?;
        let path = self.sane(path)?;
        self.look_away();
        match fsops::create_empty(&self.real_path(&path)).await {
            Ok(()) => {}
            Err(FsError::Exists(_)) => return Ok(()),
            Err(error) => return Err(error),
        }
        let parent = paths::parent_of(&path);
        {
            let mut state = self.inner().state.write();
            state.put_file(&parent, paths::basename(&path), 0, now_millis());
        }
        self.mark_dirty(&parent);
        Ok(())
    }

    /// Creates a directory, including missing ancestors.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.writable()?;
        let path = self.sane(path)?;
        self.look_away();
        fsops::mkdir(&self.real_path(&path)).await?;
        let now = now_millis();
        {
            let mut state = self.inner().state.write();
            let mut missing = Vec::new();
            let mut cursor = path.clone();
            while cursor != "/" && !state.contains(&cursor) {
                missing.push(cursor.clone());
                cursor = paths::parent_of(&cursor);
            }
            for dir in missing.into_iter().rev() {
                state.put_dir(&dir, now);
            }
        }
        self.mark_dirty(&path);
        Ok(())
    }

    /// Deletes a file or a directory subtree.
    pub async fn del(&self, path: &str) -> Result<()> {
        self.writable()?;
        let path = self.sane(path)?;
        if path == "/" {
            return Err(FsError::Invalid("cannot delete the root".into()));
        }
        self.look_away();
        let real = self.real_path(&path);
        let metadata = fsops::stat(&real).await?;
        let parent = paths::parent_of(&path);
        if metadata.is_dir() {
            fsops::rmdir(&real, true).await?;
            self.inner().state.write().remove_dir(&path);
        } else {
            fsops::rm(&real).await?;
            self.inner()
                .state
                .write()
                .remove_file(&parent, paths::basename(&path));
        }
        self.mark_dirty(&parent);
        Ok(())
    }

    /// Writes `bytes` to a file, overwriting previous content.
    pub async fn save(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.writable()?;
        let path = self.sane(path)?;
        self.look_away();
        fsops::write(&self.real_path(&path), bytes).await?;
        let parent = paths::parent_of(&path);
        {
            let mut state = self.inner().state.write();
            state.put_file(
                &parent,
                paths::basename(&path),
                bytes.len() as u64,
                now_millis(),
            );
        }
        self.mark_dirty(&parent);
        Ok(())
    }

    fn validate_rename(&self, src: &str, dst_raw: &str) -> Result<(String, String)> {
        let src = self.sane(src)?;
        if dst_raw.trim().is_empty() {
            return Err(FsError::Invalid("empty destination".into()));
        }
        let dst = self.sane(dst_raw)?;
        if src == "/" || dst == "/" {
            return Err(FsError::Invalid("cannot rename the root".into()));
        }
        if dst == src {
            return Err(FsError::Invalid("destination equals source".into()));
        }
        if paths::is_descendant(&dst, &src) {
            return Err(FsError::Invalid(
                "cannot move a directory into itself".into(),
            ));
        }
        Ok((src, dst))
    }

    /// Moves a file or directory.
    pub async fn mv(&self, src: &str, dst: &str) -> Result<()> {
        self.writable()?;
        let (src, dst) = self.validate_rename(src, dst)?;
        self.look_away();
        let src_real = self.real_path(&src);
        let metadata = fsops::stat(&src_real).await?;
        fsops::rename(&src_real, &self.real_path(&dst)).await?;
        {
            let mut state = self.inner().state.write();
            if metadata.is_dir() {
                state.rekey_subtree(&src, &dst);
            } else {
                let moved = state
                    .remove_file(&paths::parent_of(&src), paths::basename(&src))
                    .unwrap_or(crate::store::FileEntry {
                        size: metadata.len(),
                        mtime: fsops::mtime_millis(&metadata),
                    });
                state.put_file(
                    &paths::parent_of(&dst),
                    paths::basename(&dst),
                    moved.size,
                    moved.mtime,
                );
            }
        }
        self.mark_dirty(&paths::parent_of(&src));
        self.mark_dirty(&paths::parent_of(&dst));
        Ok(())
    }

    /// Copies a single file, stamping the copy's mtime.
    pub async fn cp(&self, src: &str, dst: &str) -> Result<()> {
        self.writable()?;
        let (src, dst) = self.validate_rename(src, dst)?;
        self.look_away();
        let copied = fsops::copy_file(&self.real_path(&src), &self.real_path(&dst)).await?;
        let parent = paths::parent_of(&dst);
        {
            let mut state = self.inner().state.write();
            state.put_file(&parent, paths::basename(&dst), copied, now_millis());
        }
        self.mark_dirty(&parent);
        Ok(())
    }

    /// Recursively copies a directory, stamping every copy's mtime.
    pub async fn cpdir(&self, src: &str, dst: &str) -> Result<()> {
        self.writable()?;
        let (src, dst) = self.validate_rename(src, dst)?;
        self.look_away();
        fsops::copy_dir(&self.real_path(&src), &self.real_path(&dst)).await?;
        let now = now_millis();
        {
            let mut state = self.inner().state.write();
            state.clone_subtree(&src, &dst, now);
            if !state.contains(&dst) {
                state.put_dir(&dst, now);
            }
        }
        self.mark_dirty(&paths::parent_of(&dst));
        Ok(())
    }

    /// Pastes `src` at `dst` with cut or copy semantics, resolving name
    /// collisions first. Returns the destination actually used.
    pub async fn clipboard(&self, src: &str, dst: &str, kind: PasteKind) -> Result<String> {
        self.writable()?;
        let src = self.sane(src)?;
        let mut dst = self.sane(dst)?;
        if paths::is_descendant(&dst, &src) {
            return Err(FsError::Invalid(
                "cannot paste a directory into itself".into(),
            ));
        }
        let occupied = match fsops::stat(&self.real_path(&dst)).await {
            Ok(_) => true,
            Err(FsError::NotFound(_)) => false,
            Err(error) => return Err(error),
        };
        if dst == src || occupied {
            dst = self.resolve_collision(&dst).await?;
        }
        let metadata = fsops::stat(&self.real_path(&src)).await?;
        match kind {
            PasteKind::Cut => self.mv(&src, &dst).await?,
            PasteKind::Copy => {
                if metadata.is_dir() {
                    self.cpdir(&src, &dst).await?;
                } else {
                    self.cp(&src, &dst).await?;
                }
            }
        }
        Ok(dst)
    }

    /// Derives a free destination: the basename gains (or bumps) a
    /// `-<n>` suffix before the extension, incrementing until no such
    /// path exists on disk.
    async fn resolve_collision(&self, dst: &str) -> Result<String> {
        let dir = paths::parent_of(dst);
        let name = paths::basename(dst);
        let (stem, ext) = split_extension(name);
        let (base, mut counter) = match split_trailing_number(stem) {
            Some((base, n)) => (base, n),
            None => (stem, 1),
        };
        loop {
            counter += 1;
            let candidate = paths::join(&dir, &format!("{base}-{counter}{ext}"));
            match fsops::stat(&self.real_path(&candidate)).await {
                Ok(_) => continue,
                Err(FsError::NotFound(_)) => return Ok(candidate),
                Err(error) => return Err(error),
            }
        }
    }
}

/// Splits `name.ext` at the last dot; a leading dot is part of the stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Splits a `base-<digits>` stem into base and number.
fn split_trailing_number(stem: &str) -> Option<(&str, u64)> {
    let idx = stem.rfind('-')?;
    let digits = &stem[idx + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (&stem[..idx], n))
}
