//! Lock-file lease serializing publish runs.
//!
//! The lock file is created with `O_EXCL`; its content names the holder. A
//! crashed run leaves the file behind and blocks later runs until an
//! operator removes it.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use zonepub_core::{CollaboratorError, LeaseGuard, LeaseProvider};

#[derive(Debug, Clone)]
pub struct FileLease {
    path: PathBuf,
}

impl FileLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create(&self, holder: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{holder} pid={}\n", std::process::id()).as_bytes())
            .await?;
        file.sync_all().await
    }
}

#[async_trait]
impl LeaseProvider for FileLease {
    async fn acquire(&self, holder: &str) -> Result<LeaseGuard, CollaboratorError> {
        match self.create(holder).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let current = tokio::fs::read_to_string(&self.path)
                    .await
                    .unwrap_or_default();
                return Err(CollaboratorError::Busy {
                    operation: format!("publish lease {}", self.path.display()),
                    holder: current.trim().to_string(),
                });
            }
            Err(e) => {
                return Err(CollaboratorError::failed(
                    format!("publish lease {}", self.path.display()),
                    e,
                ))
            }
        }

        info!(lease = %self.path.display(), holder = %holder, "publish lease acquired");
        let path = self.path.clone();
        Ok(LeaseGuard::new(holder, move || {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(lease = %path.display(), error = %e, "failed to remove lease file");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_busy_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lease = FileLease::new(dir.path().join("locks/publish.lock"));

        let guard = lease.acquire("run-a").await.unwrap();
        match lease.acquire("run-b").await {
            Err(CollaboratorError::Busy { holder, .. }) => assert!(holder.starts_with("run-a")),
            other => panic!("expected busy, got {other:?}"),
        }

        drop(guard);
        assert!(!lease.path().exists());
        assert!(lease.acquire("run-c").await.is_ok());
    }
}
