//! Full calibration against the simulated rig

mod common;

use approx::assert_relative_eq;
use autopatch::{
    CalibrationConfig, CalibrationState, CalibrationStore, PatchConfig, PatchError, PatchRobot,
    StatusEvent,
};
use common::{init_logging, sim_rig};
use hardware::sim::{OpticsModel, SimRigConfig};
use hardware::Axis;
use meter_math::planar_block;
use nalgebra::{Matrix2, Matrix3, Vector3};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn calibration_config() -> CalibrationConfig {
    CalibrationConfig {
        template_count: 7,
        platform_distance_um: 30.0,
        max_travel_um: 500.0,
        ..CalibrationConfig::default()
    }
}

fn rig_config() -> SimRigConfig {
    SimRigConfig {
        optics: OpticsModel {
            jacobian: Matrix3::new(0.9, 0.1, 0.0, 0.05, 0.95, 0.0, -0.4, 0.0, 1.0),
            um_per_px: 1.2,
            ..OpticsModel::default()
        },
        ..SimRigConfig::default()
    }
}

#[test]
fn test_full_calibration_recovers_geometry() {
    init_logging();
    let (sim, rig, _) = sim_rig(rig_config());
    let dir = tempfile::tempdir().unwrap();
    let mut robot = PatchRobot::new(rig, calibration_config(), PatchConfig::default())
        .with_store(CalibrationStore::new(dir.path()))
        .unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    robot.register_callback(move |event| {
        if let StatusEvent::Calibration(state) = event {
            sink.lock().unwrap().push(*state);
        }
    });

    robot.calibrate().unwrap();

    assert_eq!(robot.calibration_state(), CalibrationState::Calibrated);
    let data = robot.engine().data().unwrap();
    assert_relative_eq!(data.jacobian, sim.config().optics.jacobian, epsilon = 2e-2);
    assert_relative_eq!(
        planar_block(&data.rotation),
        Matrix2::identity(),
        epsilon = 2e-2
    );
    assert_relative_eq!(data.um_per_px, 1.2, epsilon = 2e-2);

    // Devices are back at the origin
    assert_relative_eq!(sim.arm.raw_position(), Vector3::zeros(), epsilon = 1e-9);
    assert_relative_eq!(sim.microscope.raw_position(), Vector3::zeros(), epsilon = 1e-9);

    let states = states.lock().unwrap();
    assert!(states.contains(&CalibrationState::CalibratingPlatform));
    for axis in Axis::ALL {
        assert!(states.contains(&CalibrationState::CalibratingAxis(axis)));
    }
    assert_eq!(states.last(), Some(&CalibrationState::Calibrated));

    // A fresh robot on the same store starts calibrated
    let (_, rig, _) = sim_rig(rig_config());
    let reloaded = PatchRobot::new(rig, calibration_config(), PatchConfig::default())
        .with_store(CalibrationStore::new(dir.path()))
        .unwrap();
    assert_eq!(reloaded.calibration_state(), CalibrationState::Calibrated);
    assert_eq!(reloaded.engine().data(), Some(data));
}

#[test]
fn test_default_settings_calibrate() {
    init_logging();
    // Coarse enough that the 120 µm platform probe stays in the frame
    let config = SimRigConfig {
        optics: OpticsModel {
            um_per_px: 2.5,
            ..rig_config().optics
        },
        ..rig_config()
    };
    let (sim, rig, _) = sim_rig(config);
    let mut robot = PatchRobot::new(rig, CalibrationConfig::default(), PatchConfig::default());

    robot.calibrate().unwrap();

    let data = robot.engine().data().unwrap();
    assert_eq!(robot.engine().templates().map(|t| t.len()), Some(11));
    assert_relative_eq!(data.jacobian, sim.config().optics.jacobian, epsilon = 2e-2);
    assert_relative_eq!(data.um_per_px, 2.5, epsilon = 2e-2);
}

#[test]
fn test_stopped_rig_cancels_calibration() {
    init_logging();
    let (sim, rig, _) = sim_rig(rig_config());
    rig.running_flag().store(false, Ordering::SeqCst);
    let mut robot = PatchRobot::new(rig, calibration_config(), PatchConfig::default());

    let err = robot.calibrate().unwrap_err();

    assert!(matches!(err, PatchError::Cancelled));
    assert_eq!(robot.calibration_state(), CalibrationState::Uncalibrated);
    // Stopped before the first arm probe
    assert_eq!(sim.arm.command_count(), 0);
}
