//! Post-transfer change detection: what needs a reload.
//!
//! Independent of the source diff on purpose. The target may already hold
//! some of the content (an interrupted earlier run), and a config-only
//! change leaves every zone file byte-identical on the target.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::build::{CONFIG_SUBDIR, ZONES_SUBDIR};
use crate::model::ChangeSet;
use crate::zonefile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Added,
    Modified,
    Deleted,
}

/// One path the transport reported as changed, relative to the build root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub path: PathBuf,
    pub action: TransferAction,
}

impl TransferEntry {
    pub fn new(path: impl Into<PathBuf>, action: TransferAction) -> Self {
        Self {
            path: path.into(),
            action,
        }
    }
}

/// Itemized result of one transport run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub entries: Vec<TransferEntry>,
}

impl TransferReport {
    pub fn new(entries: Vec<TransferEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps a transfer report onto a `ChangeSet`.
#[derive(Debug, Clone)]
pub struct TransferDiffer {
    zones_prefix: PathBuf,
    config_prefix: PathBuf,
    zone_suffix: String,
}

impl TransferDiffer {
    pub fn new(zone_suffix: impl Into<String>) -> Self {
        Self {
            zones_prefix: PathBuf::from(ZONES_SUBDIR),
            config_prefix: PathBuf::from(CONFIG_SUBDIR),
            zone_suffix: zone_suffix.into(),
        }
    }

    pub fn diff(&self, report: &TransferReport) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for entry in &report.entries {
            if self.is_config(&entry.path) {
                changes.config_changed = true;
                continue;
            }
            if !entry.path.starts_with(&self.zones_prefix) {
                continue;
            }
            let Some(zone) = zonefile::zone_name_from_path(&entry.path, &self.zone_suffix) else {
                continue;
            };
            match entry.action {
                TransferAction::Added | TransferAction::Modified => {
                    changes.changed_zones.insert(zone);
                }
                TransferAction::Deleted => {
                    changes.deleted_zones.insert(zone);
                }
            }
        }

        changes
    }

    fn is_config(&self, path: &Path) -> bool {
        path.starts_with(&self.config_prefix) && path != self.config_prefix.as_path()
    }
}

impl Default for TransferDiffer {
    fn default() -> Self {
        Self::new(".zone")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::TransferAction::*;

    fn report(entries: &[(&str, TransferAction)]) -> TransferReport {
        TransferReport::new(
            entries
                .iter()
                .map(|(p, a)| TransferEntry::new(*p, *a))
                .collect(),
        )
    }

    #[test]
    fn empty_report_means_no_changes() {
        assert!(TransferDiffer::default().diff(&TransferReport::default()).is_empty());
    }

    #[test]
    fn zone_paths_map_to_zone_names() {
        let changes = TransferDiffer::default().diff(&report(&[
            ("zones/example.com.zone", Modified),
            ("zones/reverse/2.0.192.in-addr.arpa.zone", Added),
            ("zones/old.example.zone", Deleted),
        ]));
        assert!(!changes.config_changed);
        assert!(changes.is_zone_changed("example.com"));
        assert!(changes.is_zone_changed("2.0.192.in-addr.arpa"));
        assert!(changes.deleted_zones.contains("old.example"));
    }

    #[test]
    fn any_config_path_sets_config_changed() {
        let changes = TransferDiffer::default().diff(&report(&[("config/knot.conf", Modified)]));
        assert!(changes.config_changed);
        assert!(changes.changed_zones.is_empty());

        let deleted = TransferDiffer::default().diff(&report(&[("config/keys/old.key", Deleted)]));
        assert!(deleted.config_changed);
    }

    #[test]
    fn unrelated_paths_are_ignored() {
        let changes = TransferDiffer::default().diff(&report(&[
            ("zones/README", Added),
            ("config", Modified),
            ("other/example.com.zone", Added),
        ]));
        assert!(changes.is_empty());
    }
}
