//! Staging directory holding exactly what will be mirrored to the target.
//!
//! Layout: `<root>/zones/<zone path>` and `<root>/config/<config path>`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::model::{ConfigArtifact, ZoneArtifact};

pub const ZONES_SUBDIR: &str = "zones";
pub const CONFIG_SUBDIR: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTree {
    root: PathBuf,
}

impl BuildTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zones_root(&self) -> PathBuf {
        self.root.join(ZONES_SUBDIR)
    }

    pub fn config_root(&self) -> PathBuf {
        self.root.join(CONFIG_SUBDIR)
    }

    pub fn zone_path(&self, zone: &ZoneArtifact) -> PathBuf {
        self.zones_root().join(&zone.path)
    }

    pub fn config_path(&self, path: &Path) -> PathBuf {
        self.config_root().join(path)
    }

    /// Replace the staged zones and config with the given artifacts.
    ///
    /// Both subdirectories are rebuilt from scratch so that files removed
    /// from the source also vanish from the staging tree.
    pub async fn stage(
        root: impl Into<PathBuf>,
        zones: &BTreeMap<String, ZoneArtifact>,
        config: &BTreeMap<PathBuf, ConfigArtifact>,
    ) -> io::Result<BuildTree> {
        let tree = BuildTree::new(root);
        for dir in [tree.zones_root(), tree.config_root()] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            tokio::fs::create_dir_all(&dir).await?;
        }

        for zone in zones.values() {
            write_file(&tree.zone_path(zone), &zone.content).await?;
        }
        for artifact in config.values() {
            write_file(&tree.config_path(&artifact.path), &artifact.content).await?;
        }

        debug!(
            root = %tree.root.display(),
            zones = zones.len(),
            config_files = config.len(),
            "build tree staged"
        );
        Ok(tree)
    }
}

async fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}
