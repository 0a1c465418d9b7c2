//! Simulated rig devices.
//!
//! The simulation is geometric: the pipette tip sits at `J_true · arm` in
//! microscope coordinates, the camera looks at the point under the microscope,
//! and the amplifier reports a resistance derived from where the tip is
//! relative to a single spherical cell. Time is taken from a shared
//! [`shared::clock::Clock`], so with a `SimClock` every wait is instantaneous.

mod amplifier;
mod camera;
mod pressure;
mod rig;
mod stage;

pub use amplifier::{AmplifierState, ResistanceModel, SimAmplifier};
pub use camera::{OpticsModel, SimScopeCamera};
pub use pressure::SimPressure;
pub use rig::{CellModel, SimRig, SimRigConfig};
pub use stage::SimStage;
