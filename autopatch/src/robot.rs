//! One rig, its calibration, and its patch sequencer behind a single handle.

use crate::callback::{CallbackId, StatusEvent};
use crate::calibration::{CalibrationEngine, CalibrationStore};
use crate::config::{CalibrationConfig, PatchConfig};
use crate::error::{PatchError, PatchResult};
use crate::motion::{linear_move, move_to_standoff, tip_position};
use crate::rig::Rig;
use crate::sequencer::{PatchOutcome, PatchSequencer};
use crate::state::{CalibrationState, PatchState};
use hardware::Axis;
use log::{info, warn};
use nalgebra::Vector3;
use shared::image_proc::PixelPos;

pub struct PatchRobot {
    rig: Rig,
    engine: CalibrationEngine,
    sequencer: PatchSequencer,
    store: Option<CalibrationStore>,
}

impl PatchRobot {
    pub fn new(rig: Rig, calibration: CalibrationConfig, patch: PatchConfig) -> Self {
        Self {
            rig,
            engine: CalibrationEngine::new(calibration),
            sequencer: PatchSequencer::new(patch),
            store: None,
        }
    }

    /// Persist calibrations to `store` and adopt whatever it already holds
    pub fn with_store(mut self, store: CalibrationStore) -> PatchResult<Self> {
        self.store = Some(store);
        self.load_calibration()?;
        Ok(self)
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut Rig {
        &mut self.rig
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn sequencer(&self) -> &PatchSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut PatchSequencer {
        &mut self.sequencer
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.engine.state()
    }

    pub fn patch_state(&self) -> PatchState {
        self.sequencer.state()
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.rig.callbacks().register_callback(callback)
    }

    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        self.rig.callbacks().deregister_callback(callback_id)
    }

    /// Adopt the stored calibration, if any. Returns whether one was found.
    pub fn load_calibration(&mut self) -> PatchResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load()? {
            Some(data) => {
                self.engine.restore(&data)?;
                info!("loaded calibration from {}", store.dir().display());
                self.rig.emit(StatusEvent::Calibration(self.engine.state()));
                Ok(true)
            }
            None => {
                info!("no calibration stored in {}", store.dir().display());
                Ok(false)
            }
        }
    }

    /// Full calibration at the current position, persisted when a store is
    /// configured
    pub fn calibrate(&mut self) -> PatchResult<()> {
        self.engine.calibrate(&mut self.rig)?;
        if let (Some(store), Some(data)) = (&self.store, self.engine.data()) {
            store.save(&data)?;
            self.rig
                .report(format!("Calibration saved to {}", store.dir().display()));
        }
        Ok(())
    }

    pub fn take_templates(&mut self) -> PatchResult<()> {
        self.engine.take_templates(&mut self.rig)?;
        self.rig.report("Templates taken");
        Ok(())
    }

    fn require_calibrated(&self) -> PatchResult<()> {
        if self.engine.is_calibrated() {
            Ok(())
        } else {
            Err(PatchError::NotCalibrated)
        }
    }

    /// Microscope-frame point shown at `pixel`, in the current focal plane
    pub fn target_from_pixel(&self, pixel: PixelPos) -> PatchResult<Vector3<f64>> {
        let microscope = self.rig.microscope_position()?;
        self.engine.model()?.target_from_pixel(pixel, &microscope)
    }

    /// Move the tip to `target` (microscope frame) in a straight line
    pub fn position_tip(&mut self, target: &Vector3<f64>) -> PatchResult<()> {
        self.require_calibrated()?;
        let jacobian = self.engine.jacobian();
        let from = tip_position(&self.rig, jacobian)?;
        linear_move(&self.rig, jacobian, &from, target)
    }

    /// Move the tip to what is shown at `pixel`
    pub fn position_at(&mut self, pixel: PixelPos) -> PatchResult<()> {
        let target = self.target_from_pixel(pixel)?;
        self.rig.report(format!(
            "Moving tip to ({:.1}, {:.1}, {:.1}) µm",
            target.x, target.y, target.z
        ));
        self.position_tip(&target)
    }

    /// Park at the stand-off point of the cell shown at `pixel` and run a
    /// patch attempt on it
    pub fn patch_at(&mut self, pixel: PixelPos) -> PatchResult<PatchOutcome> {
        self.require_calibrated()?;
        let target = self.target_from_pixel(pixel)?;
        let sign = self.engine.withdraw_sign();
        let standoff = self.sequencer.config().standoff_um;
        self.rig.report(format!(
            "Patching at ({:.1}, {:.1}, {:.1}) µm",
            target.x, target.y, target.z
        ));

        let arm_target =
            match move_to_standoff(&self.rig, self.engine.jacobian(), &target, sign, standoff) {
                Ok(a) => a,
                Err(e) => {
                    PatchSequencer::safe_state(&self.rig);
                    return Err(e);
                }
            };
        self.sequencer.run(&mut self.rig, arm_target.x, sign)
    }

    /// One follow iteration: locate the tip and move it at most
    /// `follow_max_step_um` toward `pixel`. Returns the remaining distance
    /// in µm measured before the move.
    pub fn follow_step(&mut self, pixel: PixelPos) -> PatchResult<f64> {
        self.require_calibrated()?;
        let found = self.engine.focus(&mut self.rig)?;
        let model = self.engine.model()?;
        let tip = found.location + model.template_offset();

        let shift = model.tip_shift_to(tip, pixel)?;
        let distance = shift.norm();
        let max_step = self.sequencer.config().follow_max_step_um;
        let step = if distance > max_step {
            shift * (max_step / distance)
        } else {
            shift
        };

        let arm_delta = self.engine.jacobian().apply_inverse(&step)?;
        self.rig
            .arm
            .relative_move_group(arm_delta.as_slice(), &Axis::ALL)?;
        self.rig.settle_arm()?;
        Ok(distance)
    }

    /// Return arm and microscope to the calibration origin
    pub fn go_to_zero(&mut self) -> PatchResult<()> {
        self.rig.arm.go_to_zero_group(&Axis::ALL)?;
        self.rig.microscope.go_to_zero_group(&Axis::ALL)?;
        self.rig.settle_all()
    }

    /// Leave the devices safe; used when the robot is shut down
    pub fn shutdown(&mut self) {
        PatchSequencer::safe_state(&self.rig);
        if let Err(e) = self.rig.amplifier.enable_resistance_metering(false) {
            warn!("shutdown: disabling metering failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationData;
    use crate::rig::test_support::sim_rig;
    use approx::assert_relative_eq;
    use hardware::sim::{SimRig, SimRigConfig};
    use meter_math::embed_planar;
    use nalgebra::Vector2;

    /// Calibration matching the simulated geometry exactly
    fn true_calibration(sim: &SimRig) -> CalibrationData {
        let optics = &sim.config().optics;
        CalibrationData {
            jacobian: optics.jacobian,
            rotation: embed_planar(&optics.rotation),
            um_per_px: optics.um_per_px,
            initial_tip: PixelPos::new(64.0, 64.0),
            template_offset: PixelPos::default(),
        }
    }

    fn calibrated_robot() -> (SimRig, PatchRobot, tempfile::TempDir) {
        let (sim, rig, _) = sim_rig(SimRigConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        store.save(&true_calibration(&sim)).unwrap();
        let robot = PatchRobot::new(rig, CalibrationConfig::default(), PatchConfig::default())
            .with_store(store)
            .unwrap();
        (sim, robot, dir)
    }

    #[test]
    fn test_positioning_requires_calibration() {
        let (sim, rig, _) = sim_rig(SimRigConfig::default());
        let mut robot = PatchRobot::new(rig, CalibrationConfig::default(), PatchConfig::default());

        assert!(matches!(
            robot.position_at(PixelPos::new(10.0, 10.0)),
            Err(PatchError::NotCalibrated)
        ));
        assert!(matches!(
            robot.patch_at(PixelPos::new(10.0, 10.0)),
            Err(PatchError::NotCalibrated)
        ));
        assert_eq!(sim.arm.command_count(), 0);
    }

    #[test]
    fn test_empty_store_leaves_uncalibrated() {
        let (_, rig, _) = sim_rig(SimRigConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let robot = PatchRobot::new(rig, CalibrationConfig::default(), PatchConfig::default())
            .with_store(CalibrationStore::new(dir.path()))
            .unwrap();
        assert_eq!(robot.calibration_state(), CalibrationState::Uncalibrated);
    }

    #[test]
    fn test_click_moves_tip_under_pixel() {
        let (sim, mut robot, _dir) = calibrated_robot();
        assert_eq!(robot.calibration_state(), CalibrationState::Calibrated);

        robot.position_at(PixelPos::new(80.0, 50.0)).unwrap();

        assert_relative_eq!(
            sim.tip_position(),
            Vector3::new(-19.2, 16.8, 0.0),
            epsilon = 1e-9
        );
        let (tip, defocus) = sim.camera().tip_pixel();
        assert_relative_eq!(tip, Vector2::new(80.0, 50.0), epsilon = 1e-9);
        assert_relative_eq!(defocus, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_follow_step_is_bounded() {
        let (sim, mut robot, _dir) = calibrated_robot();
        robot.take_templates().unwrap();
        robot.sequencer_mut().config_mut().follow_max_step_um = 6.0;

        // 10 px at 1.2 µm/px is 12 µm away; two bounded steps close it
        let remaining = robot.follow_step(PixelPos::new(74.0, 64.0)).unwrap();
        assert_relative_eq!(remaining, 12.0, epsilon = 1e-9);
        assert_relative_eq!(sim.camera().tip_pixel().0.x, 69.0, epsilon = 1e-9);

        let remaining = robot.follow_step(PixelPos::new(74.0, 64.0)).unwrap();
        assert_relative_eq!(remaining, 6.0, epsilon = 1e-9);
        assert_relative_eq!(
            sim.camera().tip_pixel().0,
            Vector2::new(74.0, 64.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_go_to_zero() {
        let (sim, mut robot, _dir) = calibrated_robot();
        robot.position_at(PixelPos::new(40.0, 70.0)).unwrap();
        robot.go_to_zero().unwrap();
        assert_relative_eq!(sim.arm.raw_position(), Vector3::zeros());
        assert_relative_eq!(sim.microscope.raw_position(), Vector3::zeros());
    }
}
