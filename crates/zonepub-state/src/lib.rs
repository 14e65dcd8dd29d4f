//! zonepub-state: persisted publish baseline
//!
//! This crate owns the single piece of durable state in zonepub: the
//! revision that was last published successfully and the SOA serial that
//! each zone carried at that point.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic replacement and a well-defined empty state.
//!
//! ## Key Components
//!
//! - `PublishState`: revision + per-zone serial map, plus reloads still owed
//! - `StateStore`: async load/commit contract
//! - `FsStateStore`: JSON file backend with crash-atomic commits
//! - `fakes::MemoryStateStore`: in-memory backend for tests

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;

pub use error::StateStoreError;
pub use fs_store::FsStateStore;
pub use storage_traits::{PendingReload, PublishState, StateStore, StorageResult};
