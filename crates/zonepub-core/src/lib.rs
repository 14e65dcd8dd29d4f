//! zonepub Core Library
//!
//! The decision engine behind `zonepub check` and `zonepub publish`:
//!
//! - [`SourceDiffer`]: which zones and config changed since the last publish
//! - [`SerialAllocator`]: date-based, strictly increasing SOA serials
//! - [`Validator`]: structural checks over every artifact, aggregated
//! - [`TransferDiffer`]: what the file transport actually changed on the target
//! - [`ReloadPlanner`]: cheapest correct reload for a post-transfer change set
//!
//! External collaborators (revision source, structural checker, transport,
//! control plane, lease) are traits in [`collaborators`]; the pipeline crate
//! provides command-backed adapters and the orchestrator.

pub mod build;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fakes;
pub mod model;
pub mod obs;
pub mod reload;
pub mod serial;
pub mod source_diff;
pub mod telemetry;
pub mod transfer_diff;
pub mod validate;
pub mod zonefile;
pub mod zonelist;

pub use build::BuildTree;
pub use collaborators::{
    CheckOutcome, CollaboratorError, ControlPlane, LeaseGuard, LeaseProvider, RevisionSource,
    StructuralChecker, Transport,
};
pub use config::{
    CommandTemplates, ControlCommands, Normalization, PublishConfig, TargetConfig, Timeouts,
    TransportConfig, ZoneListConfig,
};
pub use error::{PlannerError, PublishError, SerialPolicyViolation, ZoneFileError};
pub use model::{
    ArtifactRef, ChangeSet, ConfigArtifact, Diagnostic, ReloadPlan, SourceTree, ValidationResult,
    ZoneArtifact,
};
pub use reload::{PlannerState, ReloadPlanner};
pub use serial::{date_serial, next_serial, SerialAllocator};
pub use source_diff::SourceDiffer;
pub use telemetry::init_tracing;
pub use transfer_diff::{TransferAction, TransferDiffer, TransferEntry, TransferReport};
pub use validate::{ValidationPolicy, Validator};
pub use zonelist::{zone_wildcards, ZoneListError, ZoneListTemplate};

pub use zonepub_state::{PendingReload, PublishState, StateStore};
