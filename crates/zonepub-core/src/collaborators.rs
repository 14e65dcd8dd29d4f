//! Trait seams for everything outside the decision engine.
//!
//! - `RevisionSource`: proposed and published trees by revision
//! - `StructuralChecker`: opaque DNS correctness oracle
//! - `Transport`: sync of the build tree to the target host
//! - `ControlPlane`: reload / zone reload / status on the target
//! - `LeaseProvider`: mutual exclusion between publish runs
//!
//! Adapters live in `zonepub-pipeline`; fakes live in [`crate::fakes`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use serde::{Deserialize, Serialize};

use crate::model::SourceTree;
use crate::transfer_diff::TransferReport;

/// Failure of an external call. Timeouts are failures too; nothing retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {timeout_secs}s")]
    TimedOut { operation: String, timeout_secs: u64 },

    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{operation} is held by {holder}")]
    Busy { operation: String, holder: String },
}

impl CollaboratorError {
    pub fn failed(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        CollaboratorError::Failed {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Result of one structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Checker output; the diagnostic text on failure.
    pub message: String,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Identifier of the revision that would be published.
    async fn current_revision(&self) -> Result<String, CollaboratorError>;

    /// Read the `{zones, config}` tree at `revision`.
    async fn read_tree(&self, revision: &str) -> Result<SourceTree, CollaboratorError>;
}

#[async_trait]
pub trait StructuralChecker: Send + Sync {
    /// Check a configuration file.
    async fn check_config(&self, path: &Path) -> Result<CheckOutcome, CollaboratorError>;

    /// Check a zone file as zone `zone`.
    async fn check_zone(&self, zone: &str, path: &Path) -> Result<CheckOutcome, CollaboratorError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable destination, for logs and reports.
    fn destination(&self) -> String;

    /// Mirror `source` onto the destination and itemize what changed there.
    async fn sync(&self, source: &Path) -> Result<TransferReport, CollaboratorError>;
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Re-read configuration and all zones.
    async fn reload(&self) -> Result<(), CollaboratorError>;

    /// Re-read only the named zones.
    async fn reload_zones(&self, zones: &BTreeSet<String>) -> Result<(), CollaboratorError>;

    /// Free-form server status report.
    async fn status(&self) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Acquire the publish lease for `holder`. Fails with `Busy` if taken.
    async fn acquire(&self, holder: &str) -> Result<LeaseGuard, CollaboratorError>;
}

/// RAII handle for a held lease; the release hook runs exactly once on drop.
pub struct LeaseGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LeaseGuard {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("name", &self.name)
            .field("held", &self.release.is_some())
            .finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(lease = %self.name, "releasing publish lease");
            release();
        }
    }
}
