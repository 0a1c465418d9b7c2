//! Device layer for a patch-clamp rig.
//!
//! # Overview
//!
//! The rig is driven through four capabilities, each a trait so real drivers
//! and simulations can be swapped at construction time:
//!
//! 1. [`XyzUnit`] - a three-axis motorized unit (manipulator arm or microscope
//!    stage) with per-axis and grouped moves
//! 2. [`Amplifier`] - resistance metering, holding potential, and zap delivery
//! 3. [`PressureController`] - pipette pressure in mbar
//! 4. [`shared::camera_interface::CameraInterface`] - the video feed
//!
//! All device methods take `&self`; implementations synchronize internally so
//! a handle can be shared with telemetry threads.
//!
//! The [`sim`] module implements every capability against a geometric model
//! of the pipette, microscope, and a single cell.

pub mod amplifier;
pub mod axis;
pub mod error;
pub mod manipulator;
pub mod pressure;
pub mod sim;

pub use amplifier::{format_resistance, Amplifier};
pub use axis::Axis;
pub use error::{DeviceError, DeviceResult};
pub use manipulator::XyzUnit;
pub use pressure::{PressureController, PressurePreset};
