//! Relocation of finished downloads into user-visible storage

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use crate::utils::{create_unique_file, remove_temp_file};

/// Moves a finished download into its final location
#[async_trait]
pub trait FileRelocator: Send + Sync {
    /// Copy `file` into storage under `suggested_name` and return the final path.
    ///
    /// The source file is left in place. Concurrent calls with the same
    /// suggested name must never return the same path.
    ///
    /// # Errors
    ///
    /// Permission problems should be reported as [`Error::PermissionDenied`]
    /// (or an I/O error of kind `PermissionDenied`) so the job is surfaced as
    /// a permission failure rather than a retryable one.
    async fn relocate(&self, file: &Path, suggested_name: &str) -> Result<PathBuf>;
}

/// Copies files into a directory, resolving name collisions
#[derive(Clone, Debug)]
pub struct DirectoryRelocator {
    dir: PathBuf,
    collision: FileCollisionAction,
}

impl DirectoryRelocator {
    /// Create a relocator targeting `dir`
    pub fn new(dir: impl Into<PathBuf>, collision: FileCollisionAction) -> Self {
        Self {
            dir: dir.into(),
            collision,
        }
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FileRelocator for DirectoryRelocator {
    async fn relocate(&self, file: &Path, suggested_name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| permission_aware(e, &self.dir))?;

        let mut source = tokio::fs::File::open(file)
            .await
            .map_err(|e| permission_aware(e, file))?;
        let (mut dest, target) =
            create_unique_file(&self.dir.join(suggested_name), self.collision)
                .await
                .map_err(|e| permission_aware(e, &self.dir))?;

        let copied = async {
            tokio::io::copy(&mut source, &mut dest).await?;
            dest.flush().await
        }
        .await;
        if let Err(e) = copied {
            drop(dest);
            remove_temp_file(&target).await;
            return Err(permission_aware(e, &target));
        }

        tracing::debug!(
            from = %file.display(),
            to = %target.display(),
            "Relocated download"
        );
        Ok(target)
    }
}

fn permission_aware(err: std::io::Error, path: &Path) -> Error {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        Error::PermissionDenied {
            path: path.to_path_buf(),
        }
    } else {
        Error::Io(err)
    }
}
