use crate::state::{CalibrationState, PatchState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Events emitted for external callbacks (UI, logging, recorders)
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Human-readable progress message
    Message(String),
    /// Calibration state transition
    Calibration(CalibrationState),
    /// Patch sequencer state transition
    Patch(PatchState),
    /// Resistance reading taken by the sequencer, ohms
    Resistance(f64),
    /// A stage failed; the rig has been returned to a safe state
    Failed { stage: String, reason: String },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type StatusCallback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Shared set of status listeners.
///
/// Clones share the same registrations.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Arc<Mutex<HashMap<CallbackId, StatusCallback>>>,
    next_callback_id: Arc<Mutex<CallbackId>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for status events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_callback_id.lock().unwrap();

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback; returns false if the ID was unknown
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Emit an event to all registered callbacks
    pub fn emit(&self, event: &StatusEvent) {
        // Snapshot so a callback may (de)register without deadlocking
        let callbacks: Vec<StatusCallback> =
            self.callbacks.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}
