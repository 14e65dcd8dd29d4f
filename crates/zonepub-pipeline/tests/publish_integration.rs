//! Integration tests for check and publish runs over in-memory collaborators.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use zonepub_core::fakes::{
    ControlCall, FakeChecker, FakeTransport, MemoryLease, MemoryRevisionSource,
    MemoryStateStore, RecordingControlPlane,
};
use zonepub_core::{
    zonefile, ConfigArtifact, LeaseProvider, PublishConfig, PublishError, PublishState,
    ReloadPlan, SerialPolicyViolation, SourceTree, StateStore, TransferAction, TransferEntry,
    TransferReport, ZoneArtifact, ZoneListConfig,
};
use zonepub_pipeline::{PublishOrchestrator, PublishTarget};
use zonepub_state::FsStateStore;

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn zone_text(name: &str, body: &str) -> Vec<u8> {
    format!(
        "$ORIGIN {name}.\n\
         @ IN SOA ns1.{name}. hostmaster.{name}. ( 1 ; SERIALAUTOUPDATE\n\
         \x20   3600 600 86400 300 )\n\
         @ IN NS ns1.{name}.\n\
         {body}\n"
    )
    .into_bytes()
}

fn zone(name: &str, body: &str) -> ZoneArtifact {
    ZoneArtifact::new(name, format!("{name}.zone"), zone_text(name, body))
}

fn knot_conf(text: &str) -> ConfigArtifact {
    ConfigArtifact::new("knot.conf", text.as_bytes().to_vec())
}

fn report(entries: &[(&str, TransferAction)]) -> TransferReport {
    TransferReport::new(
        entries
            .iter()
            .map(|(path, action)| TransferEntry::new(*path, *action))
            .collect(),
    )
}

fn names(zones: &[&str]) -> BTreeSet<String> {
    zones.iter().map(|z| z.to_string()).collect()
}

struct Harness {
    _build: tempfile::TempDir,
    store: Arc<dyn StateStore>,
    memory_store: Option<Arc<MemoryStateStore>>,
    source: Arc<MemoryRevisionSource>,
    checker: Arc<FakeChecker>,
    transport: Arc<FakeTransport>,
    control: Arc<RecordingControlPlane>,
    secondary: Option<(Arc<FakeTransport>, Arc<RecordingControlPlane>)>,
    lease: Arc<MemoryLease>,
    config: PublishConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(None)
    }

    fn with_state(state: PublishState) -> Self {
        Self::with_store(Some(state))
    }

    fn with_store(state: Option<PublishState>) -> Self {
        let build = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStateStore::with_state(state.unwrap_or_default()));
        let config = PublishConfig {
            build_dir: build.path().join("build"),
            ..PublishConfig::default()
        };
        Self {
            _build: build,
            store: memory.clone(),
            memory_store: Some(memory),
            source: Arc::new(MemoryRevisionSource::new()),
            checker: Arc::new(FakeChecker::new()),
            transport: Arc::new(FakeTransport::new()),
            control: Arc::new(RecordingControlPlane::new()),
            secondary: None,
            lease: Arc::new(MemoryLease::new()),
            config,
        }
    }

    fn orchestrator(&self) -> PublishOrchestrator {
        let mut targets = vec![PublishTarget::new(
            "primary",
            self.transport.clone(),
            self.control.clone(),
        )];
        if let Some((transport, control)) = &self.secondary {
            targets.push(PublishTarget::new("ns2", transport.clone(), control.clone()));
        }
        PublishOrchestrator::new(
            self.config.clone(),
            self.store.clone(),
            self.source.clone(),
            self.checker.clone(),
            targets,
            self.lease.clone(),
        )
    }

    fn state(&self) -> PublishState {
        self.memory_store.as_ref().unwrap().snapshot()
    }

    fn commits(&self) -> usize {
        self.memory_store.as_ref().unwrap().commit_count()
    }
}

fn r1() -> SourceTree {
    SourceTree::new("r1")
        .with_zone(zone("example.com", "www IN A 192.0.2.1"))
        .with_zone(zone("example.org", "www IN A 192.0.2.2"))
        .with_config(knot_conf("server:\n  listen: 0.0.0.0@53\n"))
}

/// r1 with one record of example.com changed.
fn r2_www_moved() -> SourceTree {
    SourceTree::new("r2")
        .with_zone(zone("example.com", "www IN A 192.0.2.99"))
        .with_zone(zone("example.org", "www IN A 192.0.2.2"))
        .with_config(knot_conf("server:\n  listen: 0.0.0.0@53\n"))
}

fn published_r1() -> PublishState {
    let mut state = PublishState::new("r1", Default::default());
    state.serials.insert("example.com".to_string(), 2024060100);
    state.serials.insert("example.org".to_string(), 2024053000);
    state
}

/// First publish: every zone is new and gets today's date serial.
#[tokio::test]
async fn test_first_publish_allocates_date_serials() {
    let h = Harness::new();
    h.source.push(r1());
    h.transport.queue(report(&[
        ("zones/example.com.zone", TransferAction::Added),
        ("zones/example.org.zone", TransferAction::Added),
        ("config/knot.conf", TransferAction::Added),
    ]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");

    assert_eq!(result.targets.len(), 1);
    assert_eq!(result.targets[0].name, "primary");
    assert_eq!(result.targets[0].plan, ReloadPlan::Full);
    assert_eq!(result.serials["example.com"], 2024060100);
    assert_eq!(result.serials["example.org"], 2024060100);
    assert_eq!(result.targets[0].status.as_deref(), Some("server is running"));

    let state = h.state();
    assert_eq!(state.revision, "r1");
    assert_eq!(state.serial("example.com"), Some(2024060100));
    assert_eq!(state.pending, None);
    assert_eq!(h.control.calls(), vec![ControlCall::Reload, ControlCall::Status]);
}

/// r1 -> r2 modifying one zone on the same day: serial +1, selective reload.
#[tokio::test]
async fn test_single_zone_change_reloads_selectively() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");

    assert_eq!(result.source_changes.changed_zones, names(&["example.com"]));
    assert!(!result.source_changes.config_changed);
    assert_eq!(
        result.targets[0].plan,
        ReloadPlan::Selective(names(&["example.com"]))
    );
    assert_eq!(result.published_revision, "r1");

    let state = h.state();
    assert_eq!(state.revision, "r2");
    assert_eq!(state.serial("example.com"), Some(2024060101));
    assert_eq!(state.serial("example.org"), Some(2024053000));
    assert_eq!(
        h.control.calls()[0],
        ControlCall::ReloadZones(names(&["example.com"]))
    );
}

/// Unchanged zones are staged with exactly their previously published serial.
#[tokio::test]
async fn test_unchanged_zone_keeps_published_serial_in_build() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());

    h.orchestrator().publish(june_first()).await.expect("publish failed");

    let staged = std::fs::read(h.config.build_dir.join("zones/example.org.zone")).unwrap();
    assert_eq!(zonefile::soa_serial(&staged), Ok(2024053000));
}

/// Config-only change: no serial moves, full reload.
#[tokio::test]
async fn test_config_only_change_reloads_fully() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(
        SourceTree::new("r2")
            .with_zone(zone("example.com", "www IN A 192.0.2.1"))
            .with_zone(zone("example.org", "www IN A 192.0.2.2"))
            .with_config(knot_conf("server:\n  listen: [0.0.0.0@53, ::@53]\n")),
    );
    h.transport.queue(report(&[("config/knot.conf", TransferAction::Modified)]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");

    assert!(result.source_changes.config_changed);
    assert!(result.source_changes.changed_zones.is_empty());
    assert!(result.serials.is_empty());
    assert_eq!(result.targets[0].plan, ReloadPlan::Full);
    assert_eq!(h.state().serials, published_r1().serials);
}

/// A zone added in r2 starts at YYYYMMDD00.
#[tokio::test]
async fn test_new_zone_gets_date_serial() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(SourceTree {
        revision: "r2".to_string(),
        ..r1().with_zone(zone("new.example.com", "www IN A 192.0.2.7"))
    });
    h.transport.queue(report(&[("zones/new.example.com.zone", TransferAction::Added)]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");

    assert_eq!(result.source_changes.changed_zones, names(&["new.example.com"]));
    assert_eq!(h.state().serial("new.example.com"), Some(2024060100));
    assert_eq!(
        result.targets[0].plan,
        ReloadPlan::Selective(names(&["new.example.com"]))
    );
}

/// One failing zone blocks the whole publish: no transfer, reload or commit.
#[tokio::test]
async fn test_validation_failure_blocks_publish() {
    let mut h = Harness::with_state(published_r1());
    h.checker = Arc::new(FakeChecker::new().failing_zone("example.org", "bad record"));
    h.source.push(r1());

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    let validation = err.validation().expect("expected a validation error");
    assert_eq!(validation.diagnostics.len(), 1);
    assert_eq!(validation.diagnostics[0].message, "bad record");
    assert_eq!(h.transport.sync_count(), 0);
    assert!(h.control.calls().is_empty());
    assert_eq!(h.commits(), 0);
    assert_eq!(h.state(), published_r1());
    assert!(!h.lease.is_held());
}

/// Validation covers every zone, not only changed ones.
#[tokio::test]
async fn test_every_zone_is_validated() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());

    h.orchestrator().check(june_first()).await.expect("check failed");

    assert_eq!(
        h.checker.checked_zones(),
        vec!["example.com".to_string(), "example.org".to_string()]
    );
}

/// Publishing the same revision twice: the second run is a no-op and the
/// persisted state is byte-identical.
#[tokio::test]
async fn test_second_run_is_noop_with_identical_state() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("zones_deploy.json");
    let mut h = Harness::new();
    h.store = Arc::new(FsStateStore::new(&state_path));
    h.memory_store = None;
    h.source.push(r1());

    h.transport.queue(report(&[
        ("zones/example.com.zone", TransferAction::Added),
        ("zones/example.org.zone", TransferAction::Added),
        ("config/knot.conf", TransferAction::Added),
    ]));
    h.orchestrator().publish(june_first()).await.expect("first publish failed");
    let first = std::fs::read(&state_path).unwrap();

    let second = h.orchestrator().publish(june_first()).await.expect("second publish failed");
    assert!(second.source_changes.is_empty());
    assert!(second.serials.is_empty());
    assert_eq!(second.targets[0].plan, ReloadPlan::NoOp);
    assert_eq!(std::fs::read(&state_path).unwrap(), first);

    // Full reload + status from the first run, only status from the second.
    assert_eq!(
        h.control.calls(),
        vec![ControlCall::Reload, ControlCall::Status, ControlCall::Status]
    );
}

/// Check mode never writes state, transfers, reloads or takes the lease.
#[tokio::test]
async fn test_check_mode_has_no_side_effects() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(r2_www_moved());
    let _guard = h.lease.acquire("concurrent publish").await.unwrap();

    let report = h.orchestrator().check(june_first()).await.expect("check failed");

    assert!(report.passed());
    assert_eq!(report.revision, "r2");
    assert_eq!(report.serials["example.com"], 2024060101);
    assert_eq!(h.commits(), 0);
    assert_eq!(h.state(), published_r1());
    assert_eq!(h.transport.sync_count(), 0);
    assert!(h.control.calls().is_empty());
    assert!(!h.config.build_dir.exists());
}

/// Check reports every diagnostic instead of failing on the first one.
#[tokio::test]
async fn test_check_reports_all_diagnostics() {
    let mut h = Harness::new();
    h.checker = Arc::new(
        FakeChecker::new()
            .failing_zone("example.com", "broken com")
            .failing_zone("example.org", "broken org")
            .failing_config("knot.conf", "bad listen"),
    );
    h.source.push(r1());

    let report = h.orchestrator().check(june_first()).await.expect("check failed");

    assert!(!report.passed());
    let messages: Vec<&str> = report
        .validation
        .diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(messages, vec!["bad listen", "broken com", "broken org"]);
}

/// A failed transfer stops the run before any reload or commit.
#[tokio::test]
async fn test_transfer_failure_aborts_before_reload() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.transport.queue_failure("connection reset");

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    assert!(matches!(err, PublishError::Transfer(_)));
    assert_eq!(err.stage(), "transfer");
    assert!(h.control.calls().is_empty());
    assert_eq!(h.commits(), 0);
    assert!(!h.lease.is_held());
}

/// A failed reload keeps the published revision and serials but records
/// the zones that still owe a reload.
#[tokio::test]
async fn test_reload_failure_records_pending_reload() {
    let mut h = Harness::with_state(published_r1());
    h.control = Arc::new(RecordingControlPlane::new().failing("knotc: connection refused"));
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    assert!(matches!(err, PublishError::Reload(_)));
    assert_eq!(h.transport.sync_count(), 1);
    assert_eq!(h.commits(), 1);

    let state = h.state();
    assert_eq!(state.revision, "r1");
    assert_eq!(state.serials, published_r1().serials);
    let pending = state.pending.expect("pending reload not recorded");
    assert_eq!(pending.revision, "r2");
    assert_eq!(pending.changed_zones, names(&["example.com"]));
    assert!(!pending.config_changed);
}

/// The rerun after a failed reload reloads the zones the first run moved,
/// even though the target already holds them and the transfer is empty.
#[tokio::test]
async fn test_rerun_after_reload_failure_reloads_owed_zones() {
    let mut h = Harness::with_state(published_r1());
    h.control = Arc::new(RecordingControlPlane::new().failing("timeout"));
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));
    assert!(h.orchestrator().publish(june_first()).await.is_err());

    h.control = Arc::new(RecordingControlPlane::new());
    let result = h.orchestrator().publish(june_first()).await.expect("rerun failed");

    assert_eq!(result.serials["example.com"], 2024060101);
    assert!(result.targets[0].transfer_changes.changed_zones.contains("example.com"));
    assert_eq!(
        result.targets[0].plan,
        ReloadPlan::Selective(names(&["example.com"]))
    );
    assert_eq!(
        h.control.calls()[0],
        ControlCall::ReloadZones(names(&["example.com"]))
    );

    let state = h.state();
    assert_eq!(state.revision, "r2");
    assert_eq!(state.serial("example.com"), Some(2024060101));
    assert_eq!(state.pending, None);
}

/// Owed reload work survives several failed runs and is paid once.
#[tokio::test]
async fn test_pending_reload_accumulates_across_failures() {
    let mut h = Harness::with_state(published_r1());
    h.control = Arc::new(RecordingControlPlane::new().failing("timeout"));
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));
    assert!(h.orchestrator().publish(june_first()).await.is_err());

    h.transport.queue(report(&[("zones/example.org.zone", TransferAction::Modified)]));
    h.source.push(
        SourceTree::new("r3")
            .with_zone(zone("example.com", "www IN A 192.0.2.99"))
            .with_zone(zone("example.org", "www IN A 192.0.2.3"))
            .with_config(knot_conf("server:\n  listen: 0.0.0.0@53\n")),
    );
    assert!(h.orchestrator().publish(june_first()).await.is_err());
    let pending = h.state().pending.expect("pending reload not recorded");
    assert_eq!(pending.revision, "r3");
    assert_eq!(pending.changed_zones, names(&["example.com", "example.org"]));

    h.control = Arc::new(RecordingControlPlane::new());
    let result = h.orchestrator().publish(june_first()).await.expect("rerun failed");
    assert_eq!(
        result.targets[0].plan,
        ReloadPlan::Selective(names(&["example.com", "example.org"]))
    );
    assert_eq!(h.state().revision, "r3");
    assert_eq!(h.state().pending, None);
}

/// Every target receives the build tree and reloads what changed there.
#[tokio::test]
async fn test_publish_fans_out_to_every_target() {
    let mut h = Harness::with_state(published_r1());
    let transport = Arc::new(FakeTransport::new().with_destination("ns2:/var/lib/knot/"));
    let control = Arc::new(RecordingControlPlane::new());
    h.secondary = Some((transport.clone(), control.clone()));
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));
    // The secondary missed an earlier config push as well.
    transport.queue(report(&[
        ("zones/example.com.zone", TransferAction::Modified),
        ("config/knot.conf", TransferAction::Modified),
    ]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");

    let names_seen: Vec<&str> = result.targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names_seen, vec!["primary", "ns2"]);
    assert_eq!(result.targets[1].destination, "ns2:/var/lib/knot/");
    assert_eq!(
        result.targets[0].plan,
        ReloadPlan::Selective(names(&["example.com"]))
    );
    assert_eq!(result.targets[1].plan, ReloadPlan::Full);
    assert_eq!(
        h.control.calls(),
        vec![
            ControlCall::ReloadZones(names(&["example.com"])),
            ControlCall::Status
        ]
    );
    assert_eq!(control.calls(), vec![ControlCall::Reload, ControlCall::Status]);
    assert_eq!(h.transport.synced_paths(), transport.synced_paths());
    assert_eq!(h.state().revision, "r2");
}

/// A reload failure on a later target keeps the published revision for all.
#[tokio::test]
async fn test_failing_secondary_target_blocks_commit() {
    let mut h = Harness::with_state(published_r1());
    let transport = Arc::new(FakeTransport::new());
    h.secondary = Some((
        transport.clone(),
        Arc::new(RecordingControlPlane::new().failing("ns2 unreachable")),
    ));
    h.source.push(r1());
    h.source.push(r2_www_moved());
    h.transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));
    transport.queue(report(&[("zones/example.com.zone", TransferAction::Modified)]));

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    assert!(matches!(err, PublishError::Reload(_)));
    assert_eq!(
        h.control.calls()[0],
        ControlCall::ReloadZones(names(&["example.com"]))
    );
    let state = h.state();
    assert_eq!(state.revision, "r1");
    assert!(state.pending.is_some());
    assert!(!h.lease.is_held());
}

/// Publishing without any target is refused before the state changes.
#[tokio::test]
async fn test_publish_without_targets_is_refused() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(r2_www_moved());
    let orchestrator = PublishOrchestrator::new(
        h.config.clone(),
        h.store.clone(),
        h.source.clone(),
        h.checker.clone(),
        Vec::new(),
        h.lease.clone(),
    );

    let err = orchestrator.publish(june_first()).await.unwrap_err();

    assert_eq!(err.stage(), "transfer");
    assert_eq!(h.commits(), 0);
}

/// A held lease stops a publish before anything is read.
#[tokio::test]
async fn test_busy_lease_blocks_publish() {
    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    let _guard = h.lease.acquire("other run").await.unwrap();

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    assert!(matches!(err, PublishError::Lease(_)));
    assert_eq!(h.transport.sync_count(), 0);
    assert_eq!(h.commits(), 0);
}

/// Serial overflow is fatal before any transfer.
#[tokio::test]
async fn test_serial_overflow_aborts_before_transfer() {
    let mut state = published_r1();
    state.serials.insert("example.com".to_string(), u32::MAX);
    let h = Harness::with_state(state);
    h.source.push(r1());
    h.source.push(r2_www_moved());

    let err = h.orchestrator().publish(june_first()).await.unwrap_err();

    assert!(matches!(
        err,
        PublishError::SerialPolicy(SerialPolicyViolation::Overflow { .. })
    ));
    assert_eq!(h.transport.sync_count(), 0);
    assert_eq!(h.commits(), 0);
}

/// Deleting a zone needs an explicit opt-in and then reloads fully.
#[tokio::test]
async fn test_zone_deletion_requires_opt_in() {
    let r2 = SourceTree::new("r2")
        .with_zone(zone("example.com", "www IN A 192.0.2.1"))
        .with_config(knot_conf("server:\n  listen: 0.0.0.0@53\n"));

    let h = Harness::with_state(published_r1());
    h.source.push(r1());
    h.source.push(r2.clone());
    let err = h.orchestrator().publish(june_first()).await.unwrap_err();
    assert_eq!(err.stage(), "validation");

    let mut h = Harness::with_state(published_r1());
    h.config.allow_deletions = true;
    h.source.push(r1());
    h.source.push(r2);
    h.transport.queue(report(&[("zones/example.org.zone", TransferAction::Deleted)]));

    let result = h.orchestrator().publish(june_first()).await.expect("publish failed");
    assert_eq!(result.source_changes.deleted_zones, names(&["example.org"]));
    assert_eq!(result.targets[0].plan, ReloadPlan::Full);
    // The old serial stays on record for a later re-add.
    assert_eq!(h.state().serial("example.org"), Some(2024053000));
}

/// The rendered zone list becomes part of the config bundle.
#[tokio::test]
async fn test_zone_list_is_rendered_into_config() {
    let template = br#"{"item": "zone $zonename file $zonefile"}"#;
    let mut h = Harness::new();
    h.config.zone_list = Some(ZoneListConfig {
        template: PathBuf::from("zonelist.json"),
        output: PathBuf::from("zones.conf"),
        allow: Vec::new(),
        deny: Vec::new(),
    });
    h.source
        .push(r1().with_config(ConfigArtifact::new("zonelist.json", template.to_vec())));

    let report = h.orchestrator().check(june_first()).await.expect("check failed");
    assert!(report.passed());
    assert!(report.changes.config_changed);
    assert!(h
        .checker
        .checked_configs()
        .iter()
        .any(|p| p.ends_with("zones.conf")));
}

/// Forcing all zones re-serials everything even without content changes.
#[tokio::test]
async fn test_force_all_zones() {
    let mut h = Harness::with_state(published_r1());
    h.config.force_all_zones = true;
    h.source.push(r1());

    let report = h.orchestrator().check(june_first()).await.expect("check failed");
    assert_eq!(
        report.changes.changed_zones,
        names(&["example.com", "example.org"])
    );
    assert_eq!(report.serials["example.com"], 2024060101);
    assert_eq!(report.serials["example.org"], 2024060100);
}
