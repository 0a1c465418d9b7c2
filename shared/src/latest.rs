//! Single-slot, last-write-wins publication between threads.
//!
//! A producer overwrites the slot; a consumer either peeks at the most recent
//! value or takes it. Nothing is queued, so a slow consumer skips stale values
//! instead of working through a backlog.

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    version: u64,
}

/// Shared handle to a single overwritable value.
///
/// Clones refer to the same slot.
#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Arc<Mutex<SlotState<T>>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                value: None,
                version: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the current value, discarding any unread one.
    ///
    /// Returns the version number assigned to `value`.
    pub fn publish(&self, value: T) -> u64 {
        let mut state = self.state();
        state.version += 1;
        state.value = Some(value);
        state.version
    }

    /// Remove and return the current value
    pub fn take(&self) -> Option<T> {
        self.state().value.take()
    }

    /// Drop any unread value
    pub fn clear(&self) {
        self.state().value = None;
    }

    /// Number of values published so far
    pub fn version(&self) -> u64 {
        self.state().version
    }

    pub fn is_empty(&self) -> bool {
        self.state().value.is_none()
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the most recent value, leaving it in place
    pub fn latest(&self) -> Option<T> {
        self.state().value.clone()
    }

    /// Most recent value together with its version
    pub fn latest_with_version(&self) -> Option<(T, u64)> {
        let state = self.state();
        state.value.clone().map(|v| (v, state.version))
    }
}
