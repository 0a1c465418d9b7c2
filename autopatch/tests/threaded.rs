//! Control loop on its own thread with published telemetry, on wall time

mod common;

use autopatch::telemetry::{FramePump, ResistanceSampler};
use autopatch::{
    CalibrationConfig, CalibrationStore, ControlLoop, PatchConfig, PatchRobot, PatchState,
    PendingEvent, Rig, RigDevices, StatusEvent,
};
use common::{init_logging, point_under, true_calibration};
use hardware::sim::{CellModel, SimRig, SimRigConfig};
use hardware::Amplifier;
use shared::clock::SystemClock;
use shared::image_proc::PixelPos;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_threaded_patch_with_published_telemetry() {
    init_logging();
    let click = PixelPos::new(76.0, 56.0);
    let mut config = SimRigConfig {
        settle_time: Duration::from_millis(1),
        ..SimRigConfig::default()
    };
    config.cell = CellModel {
        center: point_under(&config, click),
        seal_delay: Duration::from_millis(100),
        ..CellModel::default()
    };
    let sim = SimRig::new(config, Arc::new(SystemClock::new()));

    let amplifier: Arc<dyn Amplifier> = sim.amplifier.clone();
    let frames = FramePump::spawn(sim.camera(), Duration::from_millis(20)).unwrap();
    let sampler = ResistanceSampler::spawn(amplifier, Duration::from_millis(2)).unwrap();
    let mut devices = RigDevices::from_sim(&sim);
    devices.frames = Box::new(frames.source());
    devices.resistance = Box::new(sampler.source());

    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    store.save(&true_calibration(&sim)).unwrap();
    let patch = PatchConfig {
        baseline_settle_secs: 0.05,
        approach_settle_secs: 0.02,
        contact_confirm_secs: 0.05,
        holding_ramp_secs: 0.2,
        seal_poll_secs: 0.01,
        seal_timeout_secs: 5.0,
        ..PatchConfig::default()
    };
    let robot = PatchRobot::new(Rig::new(devices), CalibrationConfig::default(), patch)
        .with_store(store)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    robot.register_callback(move |event| {
        let done = match event {
            StatusEvent::Patch(PatchState::Sealed) => Some(Ok(())),
            StatusEvent::Failed { stage, reason } => Some(Err(format!("{stage}: {reason}"))),
            _ => None,
        };
        if let Some(done) = done {
            let _ = tx.lock().unwrap().send(done);
        }
    });

    let control = ControlLoop::new(robot);
    let handle = control.handle();
    let join = control.spawn().unwrap();
    handle.submit(PendingEvent::PatchClamp(click));

    let result = rx.recv_timeout(Duration::from_secs(20)).unwrap();
    handle.stop();
    let robot = join.join().unwrap();
    frames.stop();
    sampler.stop();

    assert_eq!(result, Ok(()));
    assert_eq!(robot.patch_state(), PatchState::Sealed);
    assert_eq!(sim.pressure.current(), 0.0);
}
