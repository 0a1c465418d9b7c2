use super::amplifier::{AmplifierState, ResistanceModel, SimAmplifier};
use super::camera::{OpticsModel, SimScopeCamera};
use super::pressure::SimPressure;
use super::stage::SimStage;
use nalgebra::{Matrix3, Vector3};
use shared::camera_interface::{CameraConfig, Orientation};
use shared::clock::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// A single spherical cell in the bath
#[derive(Debug, Clone)]
pub struct CellModel {
    /// Cell centre in microscope coordinates, µm
    pub center: Vector3<f64>,
    pub radius_um: f64,
    /// Open-tip resistance in the bath, ohms
    pub pipette_resistance: f64,
    /// Resistance multiplier while the tip presses on the membrane
    pub contact_factor: f64,
    pub seal_resistance: f64,
    /// Suction time needed before the seal forms
    pub seal_delay: Duration,
    pub whole_cell_resistance: f64,
    pub zaps_to_break_in: usize,
}

impl Default for CellModel {
    fn default() -> Self {
        Self {
            center: Vector3::new(0.0, 0.0, -40.0),
            radius_um: 8.0,
            pipette_resistance: 7e6,
            contact_factor: 1.4,
            seal_resistance: 2e9,
            seal_delay: Duration::from_secs(5),
            whole_cell_resistance: 150e6,
            zaps_to_break_in: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellPhase {
    Free,
    Contact,
    Sealed,
    WholeCell,
}

/// Layout of a simulated rig.
///
/// A platform probe of `d` µm moves the tip `d / um_per_px` pixels from the
/// frame centre, and the template window must still fit beside it. The
/// default 128 px frame at 1.2 µm/px therefore takes probes up to about
/// 60 µm; the 120 µm default calibration needs at least 2.5 µm/px at this
/// frame size, or a wider frame.
#[derive(Debug, Clone)]
pub struct SimRigConfig {
    pub frame_width: usize,
    pub frame_height: usize,
    pub orientation: Orientation,
    pub optics: OpticsModel,
    pub cell: CellModel,
    pub settle_time: Duration,
}

impl Default for SimRigConfig {
    fn default() -> Self {
        Self {
            frame_width: 128,
            frame_height: 128,
            orientation: Orientation::Identity,
            optics: OpticsModel {
                jacobian: Matrix3::new(0.9, 0.1, 0.0, 0.05, 0.95, 0.0, -0.4, 0.0, 1.0),
                um_per_px: 1.2,
                ..OpticsModel::default()
            },
            cell: CellModel::default(),
            settle_time: Duration::from_millis(50),
        }
    }
}

/// Every simulated device of one rig, wired to a shared clock
pub struct SimRig {
    pub clock: Arc<dyn Clock>,
    pub arm: SimStage,
    pub microscope: SimStage,
    pub amplifier: Arc<SimAmplifier>,
    pub pressure: Arc<SimPressure>,
    config: SimRigConfig,
}

impl SimRig {
    pub fn new(config: SimRigConfig, clock: Arc<dyn Clock>) -> Self {
        let arm = SimStage::new("sim-arm", clock.clone()).with_settle_time(config.settle_time);
        let microscope =
            SimStage::new("sim-microscope", clock.clone()).with_settle_time(config.settle_time);
        let pressure = Arc::new(SimPressure::new(clock.clone()));
        let model = cell_model(
            arm.clone(),
            config.optics.jacobian,
            pressure.clone(),
            config.cell.clone(),
        );
        let amplifier = Arc::new(SimAmplifier::new(clock.clone(), model));

        info!(
            "Simulated rig: {}x{} frames, {:.2} µm/px",
            config.frame_width, config.frame_height, config.optics.um_per_px
        );

        Self {
            clock,
            arm,
            microscope,
            amplifier,
            pressure,
            config,
        }
    }

    pub fn config(&self) -> &SimRigConfig {
        &self.config
    }

    /// A camera viewing this rig
    pub fn camera(&self) -> SimScopeCamera {
        let mut camera_config =
            CameraConfig::new(self.config.frame_width, self.config.frame_height);
        camera_config.orientation = self.config.orientation;
        SimScopeCamera::new(
            camera_config,
            self.config.optics.clone(),
            self.arm.clone(),
            self.microscope.clone(),
            self.clock.clone(),
        )
    }

    /// Tip position in microscope coordinates
    pub fn tip_position(&self) -> Vector3<f64> {
        self.config.optics.jacobian * self.arm.raw_position()
    }
}

fn cell_model(
    arm: SimStage,
    jacobian: Matrix3<f64>,
    pressure: Arc<SimPressure>,
    cell: CellModel,
) -> ResistanceModel {
    let phase = Mutex::new(CellPhase::Free);
    let suction_since: Mutex<Option<Duration>> = Mutex::new(None);

    Box::new(move |amp: &AmplifierState, now: Duration| {
        let tip = jacobian * arm.raw_position();
        let inside = (tip - cell.center).norm() <= cell.radius_um;
        let mut phase = phase.lock().unwrap_or_else(|e| e.into_inner());
        let mut since = suction_since.lock().unwrap_or_else(|e| e.into_inner());

        *phase = match *phase {
            CellPhase::Free if inside => CellPhase::Contact,
            CellPhase::Contact if !inside => {
                *since = None;
                CellPhase::Free
            }
            CellPhase::Contact if pressure.current() < -1.0 => {
                let start = *since.get_or_insert(now);
                if now.saturating_sub(start) >= cell.seal_delay {
                    CellPhase::Sealed
                } else {
                    CellPhase::Contact
                }
            }
            CellPhase::Contact => {
                *since = None;
                CellPhase::Contact
            }
            CellPhase::Sealed if amp.zaps >= cell.zaps_to_break_in => CellPhase::WholeCell,
            other => other,
        };

        match *phase {
            CellPhase::Free => cell.pipette_resistance,
            CellPhase::Contact => cell.pipette_resistance * cell.contact_factor,
            CellPhase::Sealed => cell.seal_resistance,
            CellPhase::WholeCell => cell.whole_cell_resistance,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplifier::Amplifier;
    use crate::axis::Axis;
    use crate::manipulator::XyzUnit;
    use crate::pressure::{PressureController, PressurePreset};
    use shared::clock::SimClock;

    fn rig() -> (SimRig, SimClock) {
        let clock = SimClock::new();
        let config = SimRigConfig {
            optics: OpticsModel::default(),
            cell: CellModel {
                center: Vector3::new(20.0, 0.0, 0.0),
                radius_um: 5.0,
                ..CellModel::default()
            },
            ..SimRigConfig::default()
        };
        (SimRig::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_resistance_follows_cell_lifecycle() {
        let (rig, clock) = rig();
        let amp = rig.amplifier.clone();

        assert_eq!(amp.read_meter().unwrap(), 7e6);

        rig.arm.absolute_move(16.0, Axis::X).unwrap();
        let contact = amp.read_meter().unwrap();
        assert!(contact > 1.15 * 7e6);

        rig.pressure.apply(PressurePreset::Seal).unwrap();
        assert!(amp.read_meter().unwrap() < 1e9);
        clock.advance(Duration::from_secs(5));
        assert_eq!(amp.read_meter().unwrap(), 2e9);

        // Seal holds after venting
        rig.pressure.release().unwrap();
        assert_eq!(amp.read_meter().unwrap(), 2e9);

        amp.deliver_zap().unwrap();
        assert_eq!(amp.read_meter().unwrap(), 2e9);
        amp.deliver_zap().unwrap();
        assert_eq!(amp.read_meter().unwrap(), 150e6);
    }

    #[test]
    fn test_suction_must_be_continuous() {
        let (rig, clock) = rig();
        let amp = rig.amplifier.clone();
        rig.arm.absolute_move(16.0, Axis::X).unwrap();
        amp.read_meter().unwrap();

        rig.pressure.apply(PressurePreset::Seal).unwrap();
        amp.read_meter().unwrap();
        clock.advance(Duration::from_secs(3));
        rig.pressure.release().unwrap();
        amp.read_meter().unwrap();
        rig.pressure.apply(PressurePreset::Seal).unwrap();
        amp.read_meter().unwrap();
        clock.advance(Duration::from_secs(3));

        assert!(amp.read_meter().unwrap() < 1e9);
    }

    #[test]
    fn test_camera_shares_stages() {
        let (rig, _) = rig();
        let camera = rig.camera();
        rig.microscope.relative_move(10.0, Axis::Y).unwrap();

        let (tip, _) = camera.tip_pixel();
        assert!((tip.y - 74.0).abs() < 1e-9);
    }
}
