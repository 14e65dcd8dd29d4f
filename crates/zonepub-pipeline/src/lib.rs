//! zonepub pipeline - orchestration and real-world adapters
//!
//! - [`PublishOrchestrator`]: the check and publish flows over the core engine
//! - [`GitRevisionSource`]: proposed and published trees from a git repository
//! - [`CommandChecker`], [`CommandControlPlane`]: external tools (`kzonecheck`,
//!   `knotc`, ...) driven by argument templates
//! - [`RsyncTransport`]: mirrors the build tree and itemizes what changed
//! - [`FileLease`]: lock-file based mutual exclusion between publish runs

pub mod checker;
pub mod control;
pub mod git;
pub mod lease;
pub mod orchestrator;
pub mod rsync;
pub mod runner;

pub use checker::CommandChecker;
pub use control::CommandControlPlane;
pub use git::GitRevisionSource;
pub use lease::FileLease;
pub use orchestrator::{CheckReport, PublishOrchestrator, PublishReport, PublishTarget, TargetReport};
pub use rsync::{parse_itemized, RsyncTransport};
pub use runner::{CommandError, CommandOutput, CommandRunner};
