//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryRevisionSource`, `FakeChecker`, `FakeTransport`,
//! `RecordingControlPlane` and `MemoryLease`. None of them touch the
//! filesystem, spawn a process or open a socket.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::collaborators::*;
use crate::model::SourceTree;
use crate::transfer_diff::TransferReport;

pub use zonepub_state::fakes::MemoryStateStore;

// ---------------------------------------------------------------------------
// MemoryRevisionSource
// ---------------------------------------------------------------------------

/// Revision source backed by a `BTreeMap<revision, SourceTree>`.
#[derive(Debug, Default)]
pub struct MemoryRevisionSource {
    current: Mutex<String>,
    trees: Mutex<BTreeMap<String, SourceTree>>,
}

impl MemoryRevisionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tree` under its revision and make it the current one.
    pub fn push(&self, tree: SourceTree) {
        *self.current.lock().unwrap() = tree.revision.clone();
        self.trees.lock().unwrap().insert(tree.revision.clone(), tree);
    }

    /// Register `tree` without moving the current revision.
    pub fn insert(&self, tree: SourceTree) {
        self.trees.lock().unwrap().insert(tree.revision.clone(), tree);
    }
}

#[async_trait]
impl RevisionSource for MemoryRevisionSource {
    async fn current_revision(&self) -> Result<String, CollaboratorError> {
        let current = self.current.lock().unwrap().clone();
        if current.is_empty() {
            return Err(CollaboratorError::failed("revision", "no revision pushed"));
        }
        Ok(current)
    }

    async fn read_tree(&self, revision: &str) -> Result<SourceTree, CollaboratorError> {
        self.trees
            .lock()
            .unwrap()
            .get(revision)
            .cloned()
            .ok_or_else(|| CollaboratorError::failed("read tree", format!("unknown revision {revision}")))
    }
}

// ---------------------------------------------------------------------------
// FakeChecker
// ---------------------------------------------------------------------------

/// Structural checker that passes everything except configured failures.
///
/// Config failures match on path suffix, so `failing_config("knot.conf", ..)`
/// also matches the staged `build/config/knot.conf`.
#[derive(Debug, Default)]
pub struct FakeChecker {
    zone_failures: BTreeMap<String, String>,
    config_failures: BTreeMap<PathBuf, String>,
    unavailable: bool,
    checked_zones: Mutex<Vec<String>>,
    checked_configs: Mutex<Vec<PathBuf>>,
}

impl FakeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_zone(mut self, zone: &str, message: &str) -> Self {
        self.zone_failures.insert(zone.to_string(), message.to_string());
        self
    }

    pub fn failing_config(mut self, path: &str, message: &str) -> Self {
        self.config_failures.insert(PathBuf::from(path), message.to_string());
        self
    }

    /// Every check errors as if the checker binary were missing.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Zone names checked so far, sorted.
    pub fn checked_zones(&self) -> Vec<String> {
        let mut zones = self.checked_zones.lock().unwrap().clone();
        zones.sort();
        zones
    }

    pub fn checked_configs(&self) -> Vec<PathBuf> {
        self.checked_configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuralChecker for FakeChecker {
    async fn check_config(&self, path: &Path) -> Result<CheckOutcome, CollaboratorError> {
        self.checked_configs.lock().unwrap().push(path.to_path_buf());
        if self.unavailable {
            return Err(CollaboratorError::failed("check config", "checker not found"));
        }
        let failure = self
            .config_failures
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix));
        Ok(match failure {
            Some((_, message)) => CheckOutcome::fail(message.clone()),
            None => CheckOutcome::pass(),
        })
    }

    async fn check_zone(&self, zone: &str, _path: &Path) -> Result<CheckOutcome, CollaboratorError> {
        self.checked_zones.lock().unwrap().push(zone.to_string());
        if self.unavailable {
            return Err(CollaboratorError::failed("check zone", "checker not found"));
        }
        Ok(match self.zone_failures.get(zone) {
            Some(message) => CheckOutcome::fail(message.clone()),
            None => CheckOutcome::pass(),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

/// Transport that returns queued reports, then `fallback` once the queue
/// is empty. Records every source path it was asked to sync.
#[derive(Debug, Default)]
pub struct FakeTransport {
    queued: Mutex<VecDeque<Result<TransferReport, CollaboratorError>>>,
    fallback: TransferReport,
    synced: Mutex<Vec<PathBuf>>,
    destination: String,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination reported in logs; `memory://target` if unset.
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = destination.to_string();
        self
    }

    /// Report returned whenever nothing is queued.
    pub fn with_fallback(mut self, report: TransferReport) -> Self {
        self.fallback = report;
        self
    }

    pub fn queue(&self, report: TransferReport) {
        self.queued.lock().unwrap().push_back(Ok(report));
    }

    pub fn queue_failure(&self, message: &str) {
        self.queued
            .lock()
            .unwrap()
            .push_back(Err(CollaboratorError::failed("rsync", message)));
    }

    pub fn sync_count(&self) -> usize {
        self.synced.lock().unwrap().len()
    }

    pub fn synced_paths(&self) -> Vec<PathBuf> {
        self.synced.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn destination(&self) -> String {
        if self.destination.is_empty() {
            "memory://target".to_string()
        } else {
            self.destination.clone()
        }
    }

    async fn sync(&self, source: &Path) -> Result<TransferReport, CollaboratorError> {
        self.synced.lock().unwrap().push(source.to_path_buf());
        match self.queued.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingControlPlane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Reload,
    ReloadZones(BTreeSet<String>),
    Status,
}

/// Control plane that records calls and optionally fails reloads.
#[derive(Debug, Default)]
pub struct RecordingControlPlane {
    calls: Mutex<Vec<ControlCall>>,
    failure: Option<String>,
}

impl RecordingControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every reload fail with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ControlCall) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(call);
        match &self.failure {
            Some(message) => Err(CollaboratorError::failed("reload", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.record(ControlCall::Reload)
    }

    async fn reload_zones(&self, zones: &BTreeSet<String>) -> Result<(), CollaboratorError> {
        self.record(ControlCall::ReloadZones(zones.clone()))
    }

    async fn status(&self) -> Result<String, CollaboratorError> {
        self.calls.lock().unwrap().push(ControlCall::Status);
        Ok("server is running".to_string())
    }
}

// ---------------------------------------------------------------------------
// MemoryLease
// ---------------------------------------------------------------------------

/// Single-holder lease; the guard frees it on drop.
#[derive(Debug, Default, Clone)]
pub struct MemoryLease {
    held: Arc<AtomicBool>,
}

impl MemoryLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseProvider for MemoryLease {
    async fn acquire(&self, holder: &str) -> Result<LeaseGuard, CollaboratorError> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(CollaboratorError::Busy {
                operation: "publish lease".to_string(),
                holder: "another run".to_string(),
            });
        }
        let held = self.held.clone();
        Ok(LeaseGuard::new(holder, move || held.store(false, Ordering::SeqCst)))
    }
}
