//! Pre-transfer change detection: which zones need a new serial.

use tracing::debug;
use zonepub_state::PublishState;

use crate::config::Normalization;
use crate::model::{ChangeSet, SourceTree, ZoneArtifact};
use crate::zonefile;

/// Compares the proposed tree with the last published tree.
///
/// A zone is changed when its (optionally normalized) content differs from
/// the published version, or when the state has never seen it. Config is
/// changed when any file differs byte-wise or the file set differs. Zones
/// only present in the published tree are reported as deletions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceDiffer {
    normalization: Normalization,
    force_all_zones: bool,
}

impl SourceDiffer {
    pub fn new(normalization: Normalization) -> Self {
        Self {
            normalization,
            force_all_zones: false,
        }
    }

    /// Treat every proposed zone as changed.
    pub fn force_all_zones(mut self, force: bool) -> Self {
        self.force_all_zones = force;
        self
    }

    pub fn diff(
        &self,
        proposed: &SourceTree,
        published: &SourceTree,
        state: &PublishState,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (name, zone) in &proposed.zones {
            let changed = self.force_all_zones
                || state.serial(name).is_none()
                || match published.zones.get(name) {
                    Some(previous) => !self.same_content(zone, previous),
                    None => true,
                };
            debug!(zone = %name, digest = %zone.digest(), changed, "zone compared");
            if changed {
                changes.changed_zones.insert(name.clone());
            }
        }

        changes.deleted_zones = published
            .zones
            .keys()
            .filter(|name| !proposed.zones.contains_key(*name))
            .cloned()
            .collect();

        changes.config_changed = proposed.config != published.config;

        changes
    }

    fn same_content(&self, a: &ZoneArtifact, b: &ZoneArtifact) -> bool {
        match self.normalization {
            Normalization::Exact => a.content == b.content,
            Normalization::Normalized => {
                zonefile::normalize(&a.content) == zonefile::normalize(&b.content)
            }
        }
    }
}
