//! AUTOPATCH - vision-guided calibration and patch-clamp sequencing
//!
//! Drives a micromanipulator arm and a motorized microscope from camera
//! feedback. A rig is first calibrated: the platform rotation and image
//! scale are measured with a template series of the pipette tip, then each
//! arm axis is probed with exponentially growing steps while autofocus keeps
//! the tip in view, giving the arm-to-microscope Jacobian. With that, a click
//! in the image becomes a tip target, and a patch attempt runs
//! Idle -> Approaching -> Sealing -> BreakingIn -> Clamped against the
//! amplifier and pressure controller.
//!
//! All moves and waits happen on one control thread ([`ControlLoop`]);
//! camera frames and resistance readings may be published from their own
//! threads ([`telemetry`]).

pub mod autofocus;
pub mod calibration;
pub mod callback;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod motion;
pub mod pressure_recorder;
pub mod rig;
pub mod robot;
pub mod sequencer;
pub mod state;
pub mod telemetry;
pub mod templates;
pub mod transform;

// Re-export commonly used types for external use
pub use crate::calibration::{CalibrationData, CalibrationEngine, CalibrationStore, TipModel};
pub use crate::callback::{CallbackId, StatusEvent};
pub use crate::config::{CalibrationConfig, PatchConfig, RigConfig};
pub use crate::control_loop::{ControlHandle, ControlLoop};
pub use crate::error::{PatchError, PatchResult};
pub use crate::rig::{Rig, RigDevices};
pub use crate::robot::PatchRobot;
pub use crate::sequencer::{PatchOutcome, PatchSequencer};
pub use crate::state::{CalibrationState, PatchState, PendingEvent};
pub use crate::transform::AxisTransform;
