//! Check and publish flows.
//!
//! ```text
//! load state -> diff sources -> allocate serials -> stage -> validate
//!     check mode stops here, without touching state or the target
//! -> [lease] record pending reload
//!     -> per target: transfer -> diff transfer + pending -> plan + apply reload -> status
//! -> commit state
//! ```
//!
//! Any failure aborts the run before the next stage. The published revision
//! and serials are committed only after every target reloaded; before the
//! first transfer the source changes are recorded as pending reload work,
//! so a rerun after a failed reload still reloads those zones.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;
use zonepub_core::{
    obs, zonelist, BuildTree, ChangeSet, CollaboratorError, ControlPlane, LeaseProvider,
    PublishConfig, PublishError, PublishState, ReloadPlan, ReloadPlanner, RevisionSource,
    SerialAllocator, SourceDiffer, SourceTree, StateStore, StructuralChecker, TransferDiffer,
    Transport, ValidationPolicy, ValidationResult, Validator, ZoneArtifact,
};

/// Outcome of a check run. Validation failure is data here, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub run_id: String,
    pub revision: String,
    pub published_revision: String,
    pub changes: ChangeSet,
    /// Serials the changed zones would be published with.
    pub serials: BTreeMap<String, u32>,
    pub validation: ValidationResult,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.validation.ok
    }
}

/// One name server: where the build tree goes and how it is reloaded.
pub struct PublishTarget {
    pub name: String,
    pub transport: Arc<dyn Transport>,
    pub control: Arc<dyn ControlPlane>,
}

impl PublishTarget {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            control,
        }
    }
}

/// What happened on one target during a publish run.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub destination: String,
    /// Transfer changes plus reload work left over from earlier runs.
    pub transfer_changes: ChangeSet,
    pub plan: ReloadPlan,
    /// Remote status after the reload; `None` if the status call failed.
    pub status: Option<String>,
}

/// Outcome of a successful publish run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub run_id: String,
    pub revision: String,
    pub published_revision: String,
    pub source_changes: ChangeSet,
    /// Serials allocated for source-changed zones.
    pub serials: BTreeMap<String, u32>,
    pub targets: Vec<TargetReport>,
    pub duration_ms: u64,
}

/// Everything computed up to and including validation.
struct Prepared {
    baseline: PublishState,
    revision: String,
    published_revision: String,
    changes: ChangeSet,
    serials: BTreeMap<String, u32>,
    changed_serials: BTreeMap<String, u32>,
    zone_names: BTreeSet<String>,
    build: BuildTree,
    validation: ValidationResult,
}

/// Runs the pipeline over a set of collaborators.
pub struct PublishOrchestrator {
    config: PublishConfig,
    state_store: Arc<dyn StateStore>,
    source: Arc<dyn RevisionSource>,
    checker: Arc<dyn StructuralChecker>,
    targets: Vec<PublishTarget>,
    lease: Arc<dyn LeaseProvider>,
}

impl PublishOrchestrator {
    pub fn new(
        config: PublishConfig,
        state_store: Arc<dyn StateStore>,
        source: Arc<dyn RevisionSource>,
        checker: Arc<dyn StructuralChecker>,
        targets: Vec<PublishTarget>,
        lease: Arc<dyn LeaseProvider>,
    ) -> Self {
        Self {
            config,
            state_store,
            source,
            checker,
            targets,
            lease,
        }
    }

    pub fn targets(&self) -> &[PublishTarget] {
        &self.targets
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Validate what would be published on `today`.
    ///
    /// Stages into a private temporary directory; never writes state, never
    /// calls the transport or the control plane, never takes the lease.
    pub async fn check(&self, today: NaiveDate) -> Result<CheckReport, PublishError> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, "check");
        async {
            let start = Instant::now();
            let staging = tempfile::tempdir().map_err(PublishError::Build)?;
            let result = self.prepare(today, staging.path()).await;

            let success = matches!(&result, Ok(p) if p.validation.ok);
            obs::emit_run_finished(start.elapsed().as_millis() as u64, success);
            let prepared = match result {
                Ok(prepared) => prepared,
                Err(e) => {
                    obs::emit_run_failed(e.stage(), &e);
                    return Err(e);
                }
            };

            Ok::<_, PublishError>(CheckReport {
                run_id: run_id.clone(),
                revision: prepared.revision,
                published_revision: prepared.published_revision,
                changes: prepared.changes,
                serials: prepared.changed_serials,
                validation: prepared.validation,
            })
        }
        .instrument(span)
        .await
    }

    /// Publish the current revision.
    ///
    /// Holds the lease for the whole run. On any error the published
    /// revision and serials are left untouched; only the pending reload
    /// record may have grown.
    pub async fn publish(&self, today: NaiveDate) -> Result<PublishReport, PublishError> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, "publish");
        async {
            let start = Instant::now();
            let result = self.publish_inner(&run_id, today, start).await;
            obs::emit_run_finished(start.elapsed().as_millis() as u64, result.is_ok());
            if let Err(e) = &result {
                obs::emit_run_failed(e.stage(), e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn publish_inner(
        &self,
        run_id: &str,
        today: NaiveDate,
        start: Instant,
    ) -> Result<PublishReport, PublishError> {
        let _lease = self
            .lease
            .acquire(run_id)
            .await
            .map_err(PublishError::Lease)?;

        let prepared = self.prepare(today, &self.config.build_dir).await?;
        if !prepared.validation.ok {
            return Err(PublishError::Validation(prepared.validation));
        }

        if self.targets.is_empty() {
            return Err(PublishError::Transfer(CollaboratorError::failed(
                "publish",
                "no targets configured",
            )));
        }

        let earlier = prepared.baseline.pending.clone();
        if !prepared.changes.is_empty() || earlier.is_some() {
            let marked = prepared
                .baseline
                .with_pending(prepared.changes.to_pending(&prepared.revision));
            self.state_store.commit(&marked).await?;
        }
        let owed = earlier
            .as_ref()
            .map(|pending| ChangeSet::from_pending(pending, &prepared.zone_names));

        let mut targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let span = info_span!("target", name = %target.name);
            let report = self
                .publish_target(target, &prepared.build, owed.as_ref())
                .instrument(span)
                .await?;
            targets.push(report);
        }

        let state = PublishState::new(prepared.revision.clone(), prepared.serials);
        self.state_store.commit(&state).await?;
        obs::emit_state_committed(&state.revision, state.serials.len());

        Ok(PublishReport {
            run_id: run_id.to_string(),
            revision: prepared.revision,
            published_revision: prepared.published_revision,
            source_changes: prepared.changes,
            serials: prepared.changed_serials,
            targets,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Transfer to one target and reload what changed there, plus `owed`.
    async fn publish_target(
        &self,
        target: &PublishTarget,
        build: &BuildTree,
        owed: Option<&ChangeSet>,
    ) -> Result<TargetReport, PublishError> {
        let destination = target.transport.destination();
        let transfer_start = Instant::now();
        let report = target
            .transport
            .sync(build.root())
            .await
            .map_err(PublishError::Transfer)?;
        obs::emit_transfer_finished(
            &destination,
            report.entries.len(),
            transfer_start.elapsed().as_millis() as u64,
        );

        let mut transfer_changes =
            TransferDiffer::new(self.config.zone_suffix.clone()).diff(&report);
        obs::emit_diff_computed("transfer", &transfer_changes);
        if let Some(owed) = owed {
            transfer_changes.merge(owed);
        }

        let mut planner = ReloadPlanner::new();
        let plan = planner.decide(&transfer_changes)?;
        obs::emit_reload_decided(&plan);
        let applied = planner.apply(target.control.as_ref()).await;
        obs::emit_reload_applied(&plan, applied.is_ok());
        applied?;

        let status = match target.control.status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "status snapshot unavailable");
                None
            }
        };

        Ok(TargetReport {
            name: target.name.clone(),
            destination,
            transfer_changes,
            plan,
            status,
        })
    }

    /// Load, diff, allocate, stage into `build_root`, validate.
    async fn prepare(&self, today: NaiveDate, build_root: &Path) -> Result<Prepared, PublishError> {
        let state = self.state_store.load().await?;

        let revision = self
            .source
            .current_revision()
            .await
            .map_err(PublishError::Revision)?;
        obs::emit_run_started(&revision, &state.revision);

        let mut proposed = self
            .source
            .read_tree(&revision)
            .await
            .map_err(PublishError::Revision)?;
        let mut published = self.published_tree(&state, &revision, &proposed).await?;

        if let Some(zone_list) = &self.config.zone_list {
            zonelist::apply(&mut proposed, zone_list)?;
            if let Err(e) = zonelist::apply(&mut published, zone_list) {
                warn!(error = %e, "zone list not rendered for published tree");
            }
        }

        let changes = SourceDiffer::new(self.config.normalization)
            .force_all_zones(self.config.force_all_zones)
            .diff(&proposed, &published, &state);
        obs::emit_diff_computed("source", &changes);

        let zone_names = proposed.zone_names();
        let mut zones: BTreeMap<String, ZoneArtifact> = proposed.zones;
        let serials = SerialAllocator::new(today).allocate(&mut zones, &changes, &state)?;
        let changed_serials: BTreeMap<String, u32> = changes
            .changed_zones
            .iter()
            .filter_map(|name| serials.get(name).map(|serial| (name.clone(), *serial)))
            .collect();
        for (zone, serial) in &changed_serials {
            obs::emit_serial_allocated(zone, state.serial(zone), *serial);
        }

        let build = BuildTree::stage(build_root, &zones, &proposed.config)
            .await
            .map_err(PublishError::Build)?;

        let validator = Validator::new(
            self.checker.as_ref(),
            ValidationPolicy::from(&self.config),
        );
        let validation = validator
            .validate_all(&build, &zones, &proposed.config, &changes, &state)
            .await;
        obs::emit_validation_finished(validation.ok, validation.diagnostics.len());

        Ok(Prepared {
            published_revision: state.revision.clone(),
            baseline: state,
            revision,
            changes,
            serials,
            changed_serials,
            zone_names,
            build,
            validation,
        })
    }

    /// The tree at the last published revision; empty if nothing was published.
    async fn published_tree(
        &self,
        state: &PublishState,
        revision: &str,
        proposed: &SourceTree,
    ) -> Result<SourceTree, PublishError> {
        if state.revision.is_empty() {
            return Ok(SourceTree::default());
        }
        if state.revision == revision {
            return Ok(proposed.clone());
        }
        self.source
            .read_tree(&state.revision)
            .await
            .map_err(PublishError::Revision)
    }
}
