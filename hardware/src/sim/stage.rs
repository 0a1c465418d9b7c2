use crate::axis::Axis;
use crate::error::{DeviceError, DeviceResult};
use crate::manipulator::XyzUnit;
use nalgebra::Vector3;
use shared::clock::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// Time a simulated axis takes to report settled after a move
const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(50);

/// Bound on `wait_until_settled` for a stalled axis
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct StageState {
    raw: [f64; 3],
    zero: [f64; 3],
    moving: [bool; 3],
    stalled: [bool; 3],
    commands: usize,
}

/// Instantaneous three-axis stage.
///
/// Moves take effect immediately; `wait_until_settled` spends a fixed settle
/// time on the clock. Clones share the same state, which lets the simulated
/// camera observe positions commanded through a trait object.
#[derive(Clone)]
pub struct SimStage {
    name: String,
    state: Arc<Mutex<StageState>>,
    clock: Arc<dyn Clock>,
    settle_time: Duration,
}

impl SimStage {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(StageState::default())),
            clock,
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    fn state(&self) -> MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Absolute motor position, ignoring any zero offset
    pub fn raw_position(&self) -> Vector3<f64> {
        Vector3::from(self.state().raw)
    }

    /// Make `axis` stop responding to settle requests
    pub fn set_stalled(&self, axis: Axis, stalled: bool) {
        self.state().stalled[axis.index()] = stalled;
    }

    /// Number of move commands received
    pub fn command_count(&self) -> usize {
        self.state().commands
    }
}

impl XyzUnit for SimStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self, axis: Axis) -> DeviceResult<f64> {
        let state = self.state();
        let i = axis.index();
        Ok(state.raw[i] - state.zero[i])
    }

    fn absolute_move(&self, x: f64, axis: Axis) -> DeviceResult<()> {
        let mut state = self.state();
        let i = axis.index();
        state.raw[i] = state.zero[i] + x;
        state.moving[i] = true;
        state.commands += 1;
        Ok(())
    }

    fn relative_move(&self, dx: f64, axis: Axis) -> DeviceResult<()> {
        let mut state = self.state();
        let i = axis.index();
        state.raw[i] += dx;
        state.moving[i] = true;
        state.commands += 1;
        Ok(())
    }

    fn wait_until_settled(&self, axis: Axis) -> DeviceResult<()> {
        let i = axis.index();
        let (moving, stalled) = {
            let state = self.state();
            (state.moving[i], state.stalled[i])
        };

        if stalled {
            self.clock.sleep(SETTLE_TIMEOUT);
            warn!("{}: axis {axis} stalled", self.name);
            return Err(DeviceError::Timeout {
                device: self.name.clone(),
                axis,
                waited: SETTLE_TIMEOUT,
            });
        }

        if moving {
            self.clock.sleep(self.settle_time);
            self.state().moving[i] = false;
        }
        Ok(())
    }

    fn set_zero(&self, axis: Axis) -> DeviceResult<()> {
        let mut state = self.state();
        let i = axis.index();
        state.zero[i] = state.raw[i];
        Ok(())
    }
}
