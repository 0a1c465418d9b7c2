//! Common utilities for autopatch integration tests

#![allow(dead_code)]

use autopatch::{
    CalibrationConfig, CalibrationData, CalibrationStore, PatchConfig, PatchRobot, Rig, RigDevices,
};
use hardware::sim::{SimRig, SimRigConfig};
use meter_math::embed_planar;
use shared::clock::SimClock;
use shared::image_proc::PixelPos;
use std::sync::Arc;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulated rig on a virtual clock and a `Rig` reading it directly
pub fn sim_rig(config: SimRigConfig) -> (SimRig, Rig, SimClock) {
    let clock = SimClock::new();
    let sim = SimRig::new(config, Arc::new(clock.clone()));
    let rig = Rig::new(RigDevices::from_sim(&sim));
    (sim, rig, clock)
}

/// Calibration matching the simulated geometry exactly, taken at the origin
pub fn true_calibration(sim: &SimRig) -> CalibrationData {
    let config = sim.config();
    CalibrationData {
        jacobian: config.optics.jacobian,
        rotation: embed_planar(&config.optics.rotation),
        um_per_px: config.optics.um_per_px,
        initial_tip: PixelPos::new(
            (config.frame_width / 2) as f64,
            (config.frame_height / 2) as f64,
        ),
        template_offset: PixelPos::default(),
    }
}

/// Robot whose store already holds the true calibration
pub fn calibrated_robot(config: SimRigConfig, patch: PatchConfig) -> (SimRig, PatchRobot, TempDir) {
    let (sim, rig, _) = sim_rig(config);
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    store.save(&true_calibration(&sim)).unwrap();
    let robot = PatchRobot::new(rig, CalibrationConfig::default(), patch)
        .with_store(store)
        .unwrap();
    (sim, robot, dir)
}

/// Microscope-frame point imaged at `pixel` with the microscope at the origin
pub fn point_under(config: &SimRigConfig, pixel: PixelPos) -> nalgebra::Vector3<f64> {
    let center = nalgebra::Vector2::new(
        (config.frame_width / 2) as f64,
        (config.frame_height / 2) as f64,
    );
    let r_inv = config.optics.rotation.try_inverse().unwrap();
    let offset = nalgebra::Vector2::new(pixel.x, pixel.y) - center;
    let shift = r_inv * offset * config.optics.um_per_px;
    nalgebra::Vector3::new(-shift.x, -shift.y, 0.0)
}
