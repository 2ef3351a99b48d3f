//! Read-only file storage served by `reprise serve`.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("invalid file path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem directory whose files are served verbatim.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Serve files under `root`, which must already exist.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("`{}` is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Read the file at `relative` into memory.
    pub async fn read(&self, relative: &str) -> Result<Bytes, FileStoreError> {
        let absolute = self.resolve(relative)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, FileStoreError> {
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(FileStoreError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}
