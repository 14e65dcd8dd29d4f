use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StateStoreError;
use crate::storage_traits::{PublishState, StateStore, StorageResult};

/// JSON-file backed state store.
///
/// Commits write the new state to a temporary file in the same directory,
/// fsync it, and rename it over the old file, so a crash at any point leaves
/// either the old or the new state on disk.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    path: PathBuf,
}

impl FsStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_blocking(path: &Path) -> StorageResult<PublishState> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file, starting from empty state");
                return Ok(PublishState::default());
            }
            Err(source) => {
                return Err(StateStoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StateStoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn commit_blocking(path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let commit_err = |source| StateStoreError::Commit {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(commit_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(commit_err)?;
        tmp.write_all(bytes).map_err(commit_err)?;
        tmp.as_file().sync_all().map_err(commit_err)?;
        tmp.persist(path).map_err(|e| commit_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn load(&self) -> StorageResult<PublishState> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&path))
            .await
            .map_err(|e| StateStoreError::Backend(format!("state load task failed: {e}")))?
    }

    async fn commit(&self, state: &PublishState) -> StorageResult<()> {
        let path = self.path.clone();
        let bytes = state.to_json_bytes()?;
        tokio::task::spawn_blocking(move || Self::commit_blocking(&path, &bytes))
            .await
            .map_err(|e| StateStoreError::Backend(format!("state commit task failed: {e}")))??;
        debug!(path = %self.path.display(), revision = %state.revision, "state committed");
        Ok(())
    }
}
