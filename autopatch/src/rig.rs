//! Device handles and shared services used by the control thread.

use crate::callback::{CallbackRegistry, StatusEvent};
use crate::error::{PatchError, PatchResult};
use crate::telemetry::{DirectFrames, DirectMeter, FrameSource, ResistanceSource};
use hardware::sim::SimRig;
use hardware::{Amplifier, Axis, PressureController, XyzUnit};
use log::info;
use nalgebra::Vector3;
use ndarray::Array2;
use shared::clock::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every collaborator a patch robot needs
pub struct RigDevices {
    pub arm: Arc<dyn XyzUnit>,
    pub microscope: Arc<dyn XyzUnit>,
    pub amplifier: Arc<dyn Amplifier>,
    pub pressure: Arc<dyn PressureController>,
    pub frames: Box<dyn FrameSource>,
    pub resistance: Box<dyn ResistanceSource>,
    pub clock: Arc<dyn Clock>,
}

impl RigDevices {
    /// Devices of a simulated rig, read directly on the calling thread
    pub fn from_sim(sim: &SimRig) -> Self {
        let amplifier: Arc<dyn Amplifier> = sim.amplifier.clone();
        Self {
            arm: Arc::new(sim.arm.clone()),
            microscope: Arc::new(sim.microscope.clone()),
            amplifier: amplifier.clone(),
            pressure: sim.pressure.clone(),
            frames: Box::new(DirectFrames::new(sim.camera())),
            resistance: Box::new(DirectMeter::new(amplifier)),
            clock: sim.clock.clone(),
        }
    }
}

/// Owned by the control thread; all moves and waits go through here
pub struct Rig {
    pub arm: Arc<dyn XyzUnit>,
    pub microscope: Arc<dyn XyzUnit>,
    pub amplifier: Arc<dyn Amplifier>,
    pub pressure: Arc<dyn PressureController>,
    frames: Box<dyn FrameSource>,
    resistance: Box<dyn ResistanceSource>,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    callbacks: CallbackRegistry,
}

impl Rig {
    pub fn new(devices: RigDevices) -> Self {
        Self {
            arm: devices.arm,
            microscope: devices.microscope,
            amplifier: devices.amplifier,
            pressure: devices.pressure,
            frames: devices.frames,
            resistance: devices.resistance,
            clock: devices.clock,
            running: Arc::new(AtomicBool::new(true)),
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Flag cleared to stop in-progress procedures between steps
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Fail with [`PatchError::Cancelled`] once a stop has been requested
    pub fn check_running(&self) -> PatchResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PatchError::Cancelled)
        }
    }

    pub fn pause(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Newest frame in display orientation
    pub fn frame(&mut self) -> PatchResult<Array2<u16>> {
        self.frames.latest_frame()
    }

    /// Newest resistance reading, ohms
    pub fn resistance(&mut self) -> PatchResult<f64> {
        let ohms = self.resistance.resistance()?;
        self.emit(StatusEvent::Resistance(ohms));
        Ok(ohms)
    }

    pub fn arm_position(&self) -> PatchResult<Vector3<f64>> {
        position(self.arm.as_ref())
    }

    pub fn microscope_position(&self) -> PatchResult<Vector3<f64>> {
        position(self.microscope.as_ref())
    }

    pub fn settle_arm(&self) -> PatchResult<()> {
        Ok(self.arm.wait_until_settled_group(&Axis::ALL)?)
    }

    pub fn settle_microscope(&self) -> PatchResult<()> {
        Ok(self.microscope.wait_until_settled_group(&Axis::ALL)?)
    }

    pub fn settle_all(&self) -> PatchResult<()> {
        self.settle_arm()?;
        self.settle_microscope()
    }

    pub fn emit(&self, event: StatusEvent) {
        self.callbacks.emit(&event);
    }

    /// Log a progress message and forward it to status listeners
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.emit(StatusEvent::Message(message));
    }
}

fn position(unit: &dyn XyzUnit) -> PatchResult<Vector3<f64>> {
    let values = unit.position_group(&Axis::ALL)?;
    Ok(Vector3::from_column_slice(&values))
}
