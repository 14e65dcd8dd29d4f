//! Revision source reading zone and config trees straight from git objects.
//!
//! Nothing is checked out: files are listed with `git ls-tree` and read with
//! `git cat-file`, so a dirty working copy never leaks into a publish.

use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};
use zonepub_core::{
    zonefile, CollaboratorError, ConfigArtifact, PublishConfig, RevisionSource, SourceTree,
    ZoneArtifact,
};

use crate::runner::CommandRunner;

/// Concurrent `git cat-file` processes per tree read.
const READ_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct GitRevisionSource {
    runner: CommandRunner,
    git: String,
    reference: String,
    zones_dir: PathBuf,
    config_dir: PathBuf,
    zone_suffix: String,
}

impl GitRevisionSource {
    pub fn new(repo: impl Into<PathBuf>, config: &PublishConfig, timeout: Option<Duration>) -> Self {
        Self {
            runner: CommandRunner::new().in_dir(repo).with_timeout(timeout),
            git: "git".to_string(),
            reference: "HEAD".to_string(),
            zones_dir: config.zones_dir.clone(),
            config_dir: config.config_dir.clone(),
            zone_suffix: config.zone_suffix.clone(),
        }
    }

    /// Publish `reference` instead of `HEAD`.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>, CollaboratorError> {
        let mut argv = vec![self.git.clone()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let operation = format!("git {}", args.first().copied().unwrap_or_default());

        let output = self
            .runner
            .run(&argv)
            .await
            .map_err(|e| e.into_collaborator(&operation))?;
        if !output.success {
            return Err(CollaboratorError::failed(operation, output.message()));
        }
        Ok(output.stdout)
    }

    /// Files under `dir` at `revision`, relative to the repository root.
    async fn list(&self, revision: &str, dir: &Path) -> Result<Vec<PathBuf>, CollaboratorError> {
        let dir = dir.to_string_lossy();
        let stdout = self
            .git(&["ls-tree", "-r", "-z", "--name-only", revision, "--", &dir])
            .await?;
        Ok(stdout
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| PathBuf::from(String::from_utf8_lossy(entry).into_owned()))
            .collect())
    }

    async fn read(&self, revision: &str, path: &Path) -> Result<Vec<u8>, CollaboratorError> {
        let object = format!("{revision}:{}", path.to_string_lossy());
        self.git(&["cat-file", "blob", &object]).await
    }

    async fn read_all(
        &self,
        revision: &str,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<(PathBuf, Vec<u8>)>, CollaboratorError> {
        stream::iter(paths)
            .map(|path| async move {
                let content = self.read(revision, &path).await?;
                Ok::<_, CollaboratorError>((path, content))
            })
            .buffered(READ_CONCURRENCY)
            .try_collect()
            .await
    }
}

/// `path` relative to `dir`; `.` and the empty path mean the repository root.
fn relative_to(dir: &Path, path: &Path) -> Option<PathBuf> {
    if dir.as_os_str().is_empty() || dir == Path::new(".") {
        return Some(path.to_path_buf());
    }
    path.strip_prefix(dir).ok().map(Path::to_path_buf)
}

#[async_trait]
impl RevisionSource for GitRevisionSource {
    async fn current_revision(&self) -> Result<String, CollaboratorError> {
        let commitish = format!("{}^{{commit}}", self.reference);
        let stdout = self.git(&["rev-parse", "--verify", &commitish]).await?;
        let revision = String::from_utf8_lossy(&stdout).trim().to_string();
        if revision.is_empty() {
            return Err(CollaboratorError::failed(
                "git rev-parse",
                format!("{} did not resolve", self.reference),
            ));
        }
        Ok(revision)
    }

    async fn read_tree(&self, revision: &str) -> Result<SourceTree, CollaboratorError> {
        let mut tree = SourceTree::new(revision);

        let zone_paths: Vec<PathBuf> = self
            .list(revision, &self.zones_dir)
            .await?
            .into_iter()
            .filter(|p| p.to_string_lossy().ends_with(&self.zone_suffix))
            .collect();
        for (path, content) in self.read_all(revision, zone_paths).await? {
            let Some(relative) = relative_to(&self.zones_dir, &path) else {
                continue;
            };
            let Some(name) = zonefile::zone_name_from_path(&relative, &self.zone_suffix) else {
                continue;
            };
            match tree.zones.entry(name) {
                Entry::Occupied(existing) => {
                    warn!(
                        zone = %existing.key(),
                        kept = %existing.get().path.display(),
                        ignored = %relative.display(),
                        "duplicate zone file"
                    );
                }
                Entry::Vacant(slot) => {
                    let name = slot.key().clone();
                    slot.insert(ZoneArtifact::new(name, relative, content));
                }
            }
        }

        let config_paths = self.list(revision, &self.config_dir).await?;
        for (path, content) in self.read_all(revision, config_paths).await? {
            if let Some(relative) = relative_to(&self.config_dir, &path) {
                tree.config
                    .insert(relative.clone(), ConfigArtifact::new(relative, content));
            }
        }

        debug!(
            revision = %revision,
            zones = tree.zones.len(),
            config_files = tree.config.len(),
            "source tree read"
        );
        Ok(tree)
    }
}
