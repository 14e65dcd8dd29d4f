//! Storage trait definitions for zonepub
//!
//! `StateStore` is the only persistence seam in the system. It is async and
//! backend-agnostic; an in-memory fake lives in the `fakes` module.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StateStoreError;

/// Result type for state store operations
pub type StorageResult<T> = std::result::Result<T, StateStoreError>;

// ---------------------------------------------------------------------------
// PublishState
// ---------------------------------------------------------------------------

/// The last successfully published baseline.
///
/// `revision` is an opaque identifier handed out by the revision source
/// (a git commit id in practice). `serials` maps every zone that was ever
/// published to the SOA serial it carried. Entries are never dropped, so a
/// zone that is removed and later re-added continues from its old serial.
///
/// A `BTreeMap` keeps the serialized form byte-stable across commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishState {
    /// Revision of the source tree that is live.
    #[serde(default)]
    pub revision: String,

    /// Zone name -> published serial.
    #[serde(default)]
    pub serials: BTreeMap<String, u32>,

    /// Reload work of a run that reached the target but never committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingReload>,
}

/// Reloads owed to the name servers.
///
/// Written before files are transferred and cleared by the commit that
/// follows a successful reload. While it is set, the target may hold files
/// the name server has not loaded, so the next run reloads them whatever
/// its own transfer reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReload {
    /// Revision whose transfer was started.
    pub revision: String,

    #[serde(default)]
    pub changed_zones: BTreeSet<String>,

    #[serde(default)]
    pub deleted_zones: BTreeSet<String>,

    #[serde(default)]
    pub config_changed: bool,
}

impl PendingReload {
    /// Union of two pending sets; `other`'s revision wins.
    pub fn merged(mut self, other: PendingReload) -> Self {
        self.revision = other.revision;
        self.changed_zones.extend(other.changed_zones);
        self.deleted_zones.extend(other.deleted_zones);
        self.config_changed |= other.config_changed;
        self
    }
}

impl PublishState {
    pub fn new(revision: impl Into<String>, serials: BTreeMap<String, u32>) -> Self {
        Self {
            revision: revision.into(),
            serials,
            pending: None,
        }
    }

    /// True when nothing has ever been published.
    pub fn is_empty(&self) -> bool {
        self.revision.is_empty() && self.serials.is_empty() && self.pending.is_none()
    }

    /// The same baseline with `pending` recorded on top of any earlier
    /// pending work.
    pub fn with_pending(&self, pending: PendingReload) -> Self {
        let pending = match self.pending.clone() {
            Some(earlier) => earlier.merged(pending),
            None => pending,
        };
        Self {
            pending: Some(pending),
            ..self.clone()
        }
    }

    /// Serial last published for `zone`, if any.
    pub fn serial(&self, zone: &str) -> Option<u32> {
        self.serials.get(zone).copied()
    }

    /// Canonical on-disk encoding (pretty JSON, trailing newline).
    pub fn to_json_bytes(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Persistence contract for the publish baseline.
///
/// Guarantees:
/// - `load()` on a store that was never committed returns `PublishState::default()`.
/// - After `commit(s)` returns `Ok`, `load()` returns `s`.
/// - A failed or interrupted `commit` leaves the previous state observable.
///
/// Concurrent commits are last-writer-wins; callers serialize publish runs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the current baseline.
    async fn load(&self) -> StorageResult<PublishState>;

    /// Atomically replace the baseline.
    async fn commit(&self, state: &PublishState) -> StorageResult<()>;
}
