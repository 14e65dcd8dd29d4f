//! Structured lifecycle events for a publish or check run.
//!
//! Every event carries an `event` field (`run.started`, `diff.computed`,
//! `serial.allocated`, ...) so log pipelines can filter on it without
//! parsing messages. All events are emitted inside the span returned by
//! [`run_span`].

use tracing::{info, warn, Span};

use crate::model::{ChangeSet, ReloadPlan};

/// Span carrying `run_id` and `mode` for everything a run logs.
///
/// Attach it with `tracing::Instrument` so the run future stays `Send`:
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span(&run_id, "publish")).await
/// ```
pub fn run_span(run_id: &str, mode: &str) -> Span {
    tracing::info_span!("zonepub.run", run_id = %run_id, mode = %mode)
}

pub fn emit_run_started(revision: &str, published_revision: &str) {
    info!(
        event = "run.started",
        revision = %revision,
        published_revision = %published_revision,
    );
}

/// `source` is either `"source"` or `"transfer"`.
pub fn emit_diff_computed(source: &str, changes: &ChangeSet) {
    info!(
        event = "diff.computed",
        source = %source,
        changed_zones = changes.changed_zones.len(),
        deleted_zones = changes.deleted_zones.len(),
        config_changed = changes.config_changed,
    );
}

pub fn emit_serial_allocated(zone: &str, previous: Option<u32>, serial: u32) {
    info!(
        event = "serial.allocated",
        zone = %zone,
        previous = previous.unwrap_or(0),
        serial = serial,
    );
}

pub fn emit_validation_finished(ok: bool, diagnostics: usize) {
    if ok {
        info!(event = "validation.finished", ok = ok, diagnostics = diagnostics);
    } else {
        warn!(event = "validation.finished", ok = ok, diagnostics = diagnostics);
    }
}

pub fn emit_transfer_finished(destination: &str, entries: usize, duration_ms: u64) {
    info!(
        event = "transfer.finished",
        destination = %destination,
        entries = entries,
        duration_ms = duration_ms,
    );
}

pub fn emit_reload_decided(plan: &ReloadPlan) {
    info!(event = "reload.decided", plan = %plan);
}

pub fn emit_reload_applied(plan: &ReloadPlan, success: bool) {
    if success {
        info!(event = "reload.applied", plan = %plan, success = success);
    } else {
        warn!(event = "reload.applied", plan = %plan, success = success);
    }
}

pub fn emit_state_committed(revision: &str, zones: usize) {
    info!(event = "state.committed", revision = %revision, zones = zones);
}

pub fn emit_run_finished(duration_ms: u64, success: bool) {
    info!(event = "run.finished", duration_ms = duration_ms, success = success);
}

/// Failure that ends the run, at warning level.
pub fn emit_run_failed(stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", stage = %stage, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_inside_run_span() {
        let _entered = run_span("test-run", "check").entered();
        emit_diff_computed("source", &ChangeSet::default());
        emit_reload_decided(&ReloadPlan::NoOp);
    }
}
