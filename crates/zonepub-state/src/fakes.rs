//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryStateStore` satisfies the `StateStore` contract without touching
//! the filesystem, records how many commits happened, and can be told to
//! fail the next commit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateStoreError;
use crate::storage_traits::*;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PublishState>,
    commits: AtomicUsize,
    fail_next_commit: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing baseline.
    pub fn with_state(state: PublishState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Current baseline, without going through the async trait.
    pub fn snapshot(&self) -> PublishState {
        self.state.lock().unwrap().clone()
    }

    /// Make the next `commit` fail with a backend error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> StorageResult<PublishState> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn commit(&self, state: &PublishState) -> StorageResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StateStoreError::Backend("injected commit failure".to_string()));
        }
        *self.state.lock().unwrap() = state.clone();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
