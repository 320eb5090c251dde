//! Process-local metadata store.
//!
//! Used by tests and single-process deployments. Availability can be
//! toggled to exercise the paths that run while the store is unreachable.

use crate::core::error::{PlaneError, PlaneResult};
use crate::store::state::StoreState;
use crate::store::StateBackend;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory metadata store.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_state(StoreState::new())
    }

    /// Create a store from existing state.
    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent operation succeed or fail with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }

    fn check_available(&self) -> PlaneResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaneError::unavailable("memory store marked unavailable"))
        }
    }
}

impl StateBackend for MemoryStore {
    fn with_read<R>(&self, f: impl FnOnce(&StoreState) -> PlaneResult<R>) -> PlaneResult<R> {
        self.check_available()?;
        let state = self.state.lock();
        f(&state)
    }

    fn with_write<R>(&self, f: impl FnOnce(&mut StoreState) -> PlaneResult<R>) -> PlaneResult<R> {
        self.check_available()?;
        let mut state = self.state.lock();
        f(&mut state)
    }
}
