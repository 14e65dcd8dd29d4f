//! Validation gate.
//!
//! Every run validates the whole config bundle and every zone, not only
//! what changed, because a config edit can break an untouched zone. The
//! structural checker is the authority on DNS semantics; on top of it a few
//! cheap lints catch mistakes the checker cannot see (serial regressions,
//! misnamed files, unintended deletions).

use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::join_all;
use tracing::{debug, warn};
use zonepub_state::PublishState;

use crate::build::BuildTree;
use crate::collaborators::StructuralChecker;
use crate::config::PublishConfig;
use crate::model::{ArtifactRef, ChangeSet, ConfigArtifact, ValidationResult, ZoneArtifact};
use crate::zonefile;

/// Policy switches for the built-in lints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub allow_deletions: bool,
    pub allow_fancy_names: bool,
    pub check_ptr_dots: bool,
    pub check_whitespace: bool,
    pub config_entry: Option<PathBuf>,
}

impl From<&PublishConfig> for ValidationPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self {
            allow_deletions: config.allow_deletions,
            allow_fancy_names: config.allow_fancy_names,
            check_ptr_dots: config.check_ptr_dots,
            check_whitespace: !config.ignore_whitespace_errors,
            config_entry: config.config_entry.clone(),
        }
    }
}

pub struct Validator<'a> {
    checker: &'a dyn StructuralChecker,
    policy: ValidationPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(checker: &'a dyn StructuralChecker, policy: ValidationPolicy) -> Self {
        Self { checker, policy }
    }

    /// Validate the staged config bundle.
    pub async fn validate_config(
        &self,
        build: &BuildTree,
        bundle: &BTreeMap<PathBuf, ConfigArtifact>,
    ) -> ValidationResult {
        let targets: Vec<PathBuf> = match &self.policy.config_entry {
            Some(entry) => vec![entry.clone()],
            None => bundle.keys().cloned().collect(),
        };

        let mut result = ValidationResult::pass();
        if let Some(entry) = &self.policy.config_entry {
            if !bundle.contains_key(entry) {
                result.push(
                    ArtifactRef::config(entry),
                    "configured entry file is not part of the config bundle",
                );
                return result;
            }
        }

        for path in targets {
            let staged = build.config_path(&path);
            match self.checker.check_config(&staged).await {
                Ok(outcome) if outcome.passed => {}
                Ok(outcome) => result.push(ArtifactRef::config(&path), outcome.message),
                Err(e) => result.push(ArtifactRef::config(&path), e.to_string()),
            }
        }
        result
    }

    /// Validate one staged zone: structural check plus lints.
    pub async fn validate_zone(&self, build: &BuildTree, zone: &ZoneArtifact) -> ValidationResult {
        let artifact = ArtifactRef::zone(&zone.name);
        let mut result = ValidationResult::pass();

        match zonefile::soa_serial(&zone.content) {
            Ok(embedded) if embedded == zone.serial => {}
            Ok(embedded) => result.push(
                artifact.clone(),
                format!(
                    "SOA serial {embedded} does not match allocated serial {}",
                    zone.serial
                ),
            ),
            Err(e) => result.push(artifact.clone(), e.to_string()),
        }

        if !self.policy.allow_fancy_names {
            if let Some(origin) = zonefile::zone_origin(&zone.content) {
                if !zonefile::origin_matches(&zone.name, &origin) {
                    result.push(
                        artifact.clone(),
                        format!("zone origin {origin} differs from zone file name"),
                    );
                }
            }
        }

        if self.policy.check_ptr_dots {
            let bad = zonefile::ptr_missing_dot_lines(&zone.content);
            if !bad.is_empty() {
                result.push(
                    artifact.clone(),
                    format!(
                        "possibly missing trailing dot after PTR records:\n{}",
                        bad.join("\n")
                    ),
                );
            }
        }

        let staged = build.zone_path(zone);
        match self.checker.check_zone(&zone.name, &staged).await {
            Ok(outcome) if outcome.passed => {}
            Ok(outcome) => result.push(artifact, outcome.message),
            Err(e) => result.push(artifact, e.to_string()),
        }

        result
    }

    /// Second, allocator-independent monotonicity check for changed zones.
    pub fn check_serial_increase(
        zones: &BTreeMap<String, ZoneArtifact>,
        changes: &ChangeSet,
        state: &PublishState,
    ) -> ValidationResult {
        let mut result = ValidationResult::pass();
        for name in &changes.changed_zones {
            let (Some(zone), Some(previous)) = (zones.get(name), state.serial(name)) else {
                continue;
            };
            if zone.serial <= previous {
                result.push(
                    ArtifactRef::zone(name),
                    format!(
                        "zone content changed without increasing serial ({previous} -> {})",
                        zone.serial
                    ),
                );
            }
        }
        result
    }

    /// Whitespace errors in changed zones.
    pub fn check_whitespace(
        zones: &BTreeMap<String, ZoneArtifact>,
        changes: &ChangeSet,
    ) -> ValidationResult {
        let mut result = ValidationResult::pass();
        for name in &changes.changed_zones {
            let Some(zone) = zones.get(name) else {
                continue;
            };
            let errors = zonefile::whitespace_errors(&zone.content);
            if !errors.is_empty() {
                result.push(
                    ArtifactRef::zone(name),
                    format!("whitespace errors:\n{}", errors.join("\n")),
                );
            }
        }
        result
    }

    /// Reject deletions unless explicitly allowed.
    pub fn check_deletions(&self, changes: &ChangeSet) -> ValidationResult {
        let mut result = ValidationResult::pass();
        for name in &changes.deleted_zones {
            if self.policy.allow_deletions {
                warn!(zone = %name, "zone deleted from source tree");
            } else {
                result.push(
                    ArtifactRef::zone(name),
                    "zone was removed from the source tree; enable deletions to publish this",
                );
            }
        }
        result
    }

    /// Run every check over the staged build tree and aggregate the result.
    ///
    /// Zone checks run concurrently; no failure short-circuits the others.
    pub async fn validate_all(
        &self,
        build: &BuildTree,
        zones: &BTreeMap<String, ZoneArtifact>,
        config: &BTreeMap<PathBuf, ConfigArtifact>,
        changes: &ChangeSet,
        state: &PublishState,
    ) -> ValidationResult {
        let mut result = self.validate_config(build, config).await;
        result.merge(self.check_deletions(changes));
        result.merge(Self::check_serial_increase(zones, changes, state));
        if self.policy.check_whitespace {
            result.merge(Self::check_whitespace(zones, changes));
        }

        let zone_results =
            join_all(zones.values().map(|zone| self.validate_zone(build, zone))).await;
        for zone_result in zone_results {
            result.merge(zone_result);
        }

        debug!(
            ok = result.ok,
            diagnostics = result.diagnostics.len(),
            zones = zones.len(),
            "validation finished"
        );
        result
    }
}
