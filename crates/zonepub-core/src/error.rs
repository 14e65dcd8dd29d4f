//! Error taxonomy for the decision engine.

use thiserror::Error;
use zonepub_state::StateStoreError;

use crate::collaborators::CollaboratorError;
use crate::model::{ReloadPlan, ValidationResult};
use crate::zonelist::ZoneListError;

/// A serial could not be allocated without breaking monotonicity.
///
/// Always fatal for the run and raised before anything is transferred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerialPolicyViolation {
    #[error("serial for zone {zone} would overflow (previous {previous})")]
    Overflow { zone: String, previous: u32 },

    #[error("serial for zone {zone} did not increase ({previous} -> {next})")]
    NotIncreased { zone: String, previous: u32, next: u32 },
}

/// Problems locating or rewriting the SOA serial inside a zone file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneFileError {
    #[error("no SOA record with a serial field found")]
    MissingSoa,

    #[error("SOA serial {0} is not a valid 32-bit serial")]
    InvalidSerial(String),
}

/// Reload planner failures.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("cannot {action} while planner is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("{plan} failed: {source}")]
    ControlPlane {
        plan: ReloadPlan,
        #[source]
        source: CollaboratorError,
    },
}

/// Why a check or publish run stopped.
///
/// Every variant is fatal for the run. Nothing is retried; re-running the
/// whole pipeline is always safe.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("state store: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("revision source: {0}")]
    Revision(#[source] CollaboratorError),

    #[error("zone list: {0}")]
    ZoneList(#[from] ZoneListError),

    #[error(transparent)]
    SerialPolicy(#[from] SerialPolicyViolation),

    #[error("staging build tree: {0}")]
    Build(#[source] std::io::Error),

    #[error("{0}")]
    Validation(ValidationResult),

    #[error("publish lease: {0}")]
    Lease(#[source] CollaboratorError),

    #[error("transfer: {0}")]
    Transfer(#[source] CollaboratorError),

    #[error("reload: {0}")]
    Reload(#[from] PlannerError),
}

impl PublishError {
    /// Pipeline stage that failed, for logs and exit reporting.
    pub fn stage(&self) -> &'static str {
        match self {
            PublishError::StateStore(_) => "state",
            PublishError::Revision(_) => "revision",
            PublishError::ZoneList(_) => "zone-list",
            PublishError::SerialPolicy(_) => "serial",
            PublishError::Build(_) => "build",
            PublishError::Validation(_) => "validation",
            PublishError::Lease(_) => "lease",
            PublishError::Transfer(_) => "transfer",
            PublishError::Reload(_) => "reload",
        }
    }

    /// Diagnostics, when the run failed validation.
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            PublishError::Validation(result) => Some(result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_violation_display() {
        let err = SerialPolicyViolation::Overflow {
            zone: "example.com".to_string(),
            previous: u32::MAX,
        };
        assert!(err.to_string().contains("overflow"));
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn planner_error_display() {
        let err = PlannerError::InvalidTransition {
            action: "apply",
            state: "idle",
        };
        assert_eq!(err.to_string(), "cannot apply while planner is idle");
    }

    #[test]
    fn publish_error_names_its_stage() {
        let err = PublishError::Transfer(CollaboratorError::failed("rsync", "exit status 23"));
        assert_eq!(err.stage(), "transfer");
        assert_eq!(err.to_string(), "transfer: rsync failed: exit status 23");

        let err = PublishError::Validation(ValidationResult::fail(
            crate::model::ArtifactRef::zone("example.com"),
            "bad",
        ));
        assert_eq!(err.stage(), "validation");
        assert_eq!(err.validation().map(|r| r.diagnostics.len()), Some(1));
    }
}
