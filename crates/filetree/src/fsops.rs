//! Low-level filesystem primitives.
//!
//! Every operation reports failure through the categorized error kinds of
//! [`crate::error`] and never touches the index; the mutation engine owns
//! the disk-then-patch ordering.

use std::fs::Metadata;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::UNIX_EPOCH;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{categorize, FsError, Result};

/// Milliseconds since epoch for a metadata record; zero when the
/// filesystem reports no usable mtime.
pub fn mtime_millis(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub async fn stat(path: &Path) -> Result<Metadata> {
    fs::metadata(path)
        .await
        .map_err(|error| categorize(error, path))
}

/// Recursive directory create, mode 0755 on unix.
pub async fn mkdir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(path)
        .await
        .map_err(|error| categorize(error, path))
}

/// Creates an empty file, failing with [`FsError::Exists`] when the path
/// is already present.
pub async fn create_empty(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(|_| ())
        .map_err(|error| categorize(error, path))
}

pub async fn rm(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .map_err(|error| categorize(error, path))
}

pub async fn rmdir(path: &Path, recursive: bool) -> Result<()> {
    let result = if recursive {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_dir(path).await
    };
    result.map_err(|error| categorize(error, path))
}

/// Renames `src` to `dst`, falling back to copy-and-remove when the
/// rename crosses devices.
pub async fn rename(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(error) => match categorize(error, src) {
            FsError::CrossDevice(_) => {
                let metadata = stat(src).await?;
                if metadata.is_dir() {
                    copy_dir(src, dst).await?;
                    rmdir(src, true).await
                } else {
                    copy_file(src, dst).await?;
                    rm(src).await
                }
            }
            other => Err(other),
        },
    }
}

/// Copies a file, returning the number of bytes copied.
pub async fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    fs::copy(src, dst)
        .await
        .map_err(|error| categorize(error, src))
}

/// Recursively copies a directory tree.
pub async fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    copy_dir_inner(src.to_path_buf(), dst.to_path_buf()).await
}

fn copy_dir_inner(
    src: PathBuf,
    dst: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
    Box::pin(async move {
        mkdir(&dst).await?;
        let mut reader = fs::read_dir(&src)
            .await
            .map_err(|error| categorize(error, &src))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|error| categorize(error, &src))?
        {
            let child_src = entry.path();
            let child_dst = dst.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|error| categorize(error, &child_src))?;
            if file_type.is_dir() {
                copy_dir_inner(child_src, child_dst).await?;
            } else if file_type.is_file() {
                copy_file(&child_src, &child_dst).await?;
            }
        }
        Ok(())
    })
}

/// Writes `bytes` to `path`, overwriting any previous content.
pub async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|error| categorize(error, path))?;
    file.write_all(bytes)
        .await
        .map_err(|error| categorize(error, path))?;
    file.flush()
        .await
        .map_err(|error| categorize(error, path))
}

/// Lists one directory level as `(name, metadata)` pairs.
pub async fn list(path: &Path) -> Result<Vec<(String, Metadata)>> {
    let mut reader = fs::read_dir(path)
        .await
        .map_err(|error| categorize(error, path))?;
    let mut out = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|error| categorize(error, path))?
    {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(path = %entry.path().display(), %error, "skipping unreadable entry");
                continue;
            }
        };
        out.push((entry.file_name().to_string_lossy().into_owned(), metadata));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_empty_then_exists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("new.txt");
        create_empty(&path).await.unwrap();
        assert_eq!(stat(&path).await.unwrap().len(), 0);
        assert!(matches!(
            create_empty(&path).await,
            Err(FsError::Exists(_))
        ));
    }

    #[tokio::test]
    async fn stat_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            stat(&temp.path().join("missing")).await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mkdir_is_recursive() {
        let temp = TempDir::new().unwrap();
        let deep = temp.path().join("a/b/c");
        mkdir(&deep).await.unwrap();
        assert!(stat(&deep).await.unwrap().is_dir());
        // Repeat creates are fine.
        mkdir(&deep).await.unwrap();
    }

    #[tokio::test]
    async fn write_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        write(&path, b"hello world").await.unwrap();
        write(&path, b"bye").await.unwrap();
        assert_eq!(stat(&path).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rename_moves_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        mkdir(&src).await.unwrap();
        write(&src.join("f"), b"data").await.unwrap();
        let dst = temp.path().join("dst");
        rename(&src, &dst).await.unwrap();
        assert!(stat(&src).await.is_err());
        assert_eq!(stat(&dst.join("f")).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn copy_dir_copies_recursively() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        mkdir(&src.join("nested")).await.unwrap();
        write(&src.join("nested/f"), b"abc").await.unwrap();
        let dst = temp.path().join("dst");
        copy_dir(&src, &dst).await.unwrap();
        assert_eq!(stat(&dst.join("nested/f")).await.unwrap().len(), 3);
        assert_eq!(stat(&src.join("nested/f")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rmdir_non_recursive_rejects_non_empty() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("d");
        mkdir(&dir).await.unwrap();
        write(&dir.join("f"), b"x").await.unwrap();
        let err = rmdir(&dir, false).await.unwrap_err();
        assert!(matches!(err, FsError::NotEmpty(_) | FsError::Io(_)));
        rmdir(&dir, true).await.unwrap();
        assert!(stat(&dir).await.is_err());
    }

    #[tokio::test]
    async fn list_names_and_metadata() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("a"), b"1").await.unwrap();
        mkdir(&temp.path().join("b")).await.unwrap();
        let mut names: Vec<String> = list(temp.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
