//! Approach, seal, and break-in state machine.
//!
//! ```text
//! Idle --precheck--> Idle(baseline) --approach--> Approaching
//!      --contact--> Sealing --gigaseal--> Sealed --break_in--> BreakingIn --> Clamped
//! ```
//!
//! Any failure releases the pressure, disables the holding potential, and
//! returns the sequencer to `Idle` before the error is reported.

use crate::callback::StatusEvent;
use crate::config::PatchConfig;
use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use crate::state::PatchState;
use hardware::{format_resistance, Axis};
use log::{info, warn};
use std::time::Duration;

/// How a completed attempt ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatchOutcome {
    /// Gigaseal formed; break-in not requested
    Sealed { resistance: f64 },
    /// Whole-cell configuration reached
    Clamped { resistance: f64 },
}

pub struct PatchSequencer {
    config: PatchConfig,
    state: PatchState,
    /// Present only while the current attempt's baseline is valid
    baseline: Option<f64>,
}

impl PatchSequencer {
    pub fn new(config: PatchConfig) -> Self {
        Self {
            config,
            state: PatchState::Idle,
            baseline: None,
        }
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PatchConfig {
        &mut self.config
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    /// Baseline resistance of the current attempt, once validated
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn set_state(&mut self, rig: &Rig, state: PatchState) {
        if self.state != state {
            info!("patch: {} -> {}", self.state, state);
        }
        self.state = state;
        rig.emit(StatusEvent::Patch(state));
    }

    /// Vent the pipette and disable the holding potential.
    ///
    /// Errors are logged rather than returned; the caller reports the failure
    /// that led here.
    pub fn safe_state(rig: &Rig) {
        if let Err(e) = rig.pressure.release() {
            warn!("safe state: pressure release failed: {e}");
        }
        if let Err(e) = rig.amplifier.set_holding_enabled(false) {
            warn!("safe state: disabling holding failed: {e}");
        }
    }

    fn conclude<T>(&mut self, rig: &Rig, stage: &str, result: PatchResult<T>) -> PatchResult<T> {
        result.map_err(|err| {
            Self::safe_state(rig);
            self.baseline = None;
            self.set_state(rig, PatchState::Idle);
            warn!("{stage} failed: {err}");
            rig.emit(StatusEvent::Failed {
                stage: stage.to_string(),
                reason: err.to_string(),
            });
            err
        })
    }

    /// Run a full attempt from the current position toward arm X
    /// `target_x`, stepping against `withdraw_sign`
    pub fn run(
        &mut self,
        rig: &mut Rig,
        target_x: f64,
        withdraw_sign: f64,
    ) -> PatchResult<PatchOutcome> {
        self.precheck(rig)?;
        self.approach(rig, target_x, withdraw_sign)?;
        let resistance = self.seal(rig)?;
        if !self.config.clamp {
            return Ok(PatchOutcome::Sealed { resistance });
        }
        let resistance = self.break_in(rig)?;
        Ok(PatchOutcome::Clamped { resistance })
    }

    /// Validate the pipette and record the baseline resistance.
    ///
    /// Leaves positive pressure on for the approach.
    pub fn precheck(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        self.baseline = None;
        self.set_state(rig, PatchState::Idle);
        let result = self.precheck_inner(rig);
        self.conclude(rig, "pipette check", result)
    }

    fn precheck_inner(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        rig.check_running()?;
        rig.pressure.release()?;
        rig.amplifier.enable_resistance_metering(false)?;
        rig.amplifier.auto_pipette_offset()?;
        rig.amplifier.set_holding(0.0)?;
        rig.amplifier.set_holding_enabled(true)?;
        rig.amplifier.enable_resistance_metering(true)?;
        rig.pause(self.config.baseline_settle());

        let resistance = rig.resistance()?;
        if resistance < self.config.min_pipette_resistance {
            return Err(PatchError::BrokenPipette { resistance });
        }
        if resistance > self.config.max_pipette_resistance {
            return Err(PatchError::CloggedPipette { resistance });
        }

        rig.pressure.set_pressure(self.config.nearing_pressure_mbar)?;
        rig.report(format!(
            "Pipette resistance {}",
            format_resistance(resistance)
        ));
        self.baseline = Some(resistance);
        Ok(resistance)
    }

    /// Step arm X toward `target_x` until contact is confirmed.
    ///
    /// Returns the confirmed contact resistance.
    pub fn approach(
        &mut self,
        rig: &mut Rig,
        target_x: f64,
        withdraw_sign: f64,
    ) -> PatchResult<f64> {
        let result = match self.baseline {
            Some(baseline) => {
                self.set_state(rig, PatchState::Approaching);
                self.approach_inner(rig, baseline, target_x, withdraw_sign)
            }
            None => Err(PatchError::NoBaseline),
        };
        self.conclude(rig, "approach", result)
    }

    fn approach_inner(
        &mut self,
        rig: &mut Rig,
        baseline: f64,
        target_x: f64,
        withdraw_sign: f64,
    ) -> PatchResult<f64> {
        let step = self.config.approach_step_um;
        let contact = self.config.contact_ratio * baseline;
        let start = rig.arm.position(Axis::X)?;
        let distance = (withdraw_sign * (start - target_x)).max(0.0);
        let max_steps = (distance / step).ceil() as usize + 2;
        rig.report(format!("Approaching cell, {distance:.1} µm to target"));

        let mut traveled = 0.0;
        for _ in 0..max_steps {
            rig.check_running()?;
            rig.arm.relative_move(-withdraw_sign * step, Axis::X)?;
            rig.arm.wait_until_settled(Axis::X)?;
            rig.pause(self.config.approach_settle());

            let position = rig.arm.position(Axis::X)?;
            traveled = withdraw_sign * (start - position);
            if rig.resistance()? > contact {
                rig.report("Resistance rising, confirming contact");
                rig.pause(self.config.contact_confirm());
                let confirmed = rig.resistance()?;
                if confirmed > contact {
                    rig.report(format!(
                        "Cell contact at {}",
                        format_resistance(confirmed)
                    ));
                    return Ok(confirmed);
                }
            }
            if withdraw_sign * (position - target_x) < 0.0 {
                break;
            }
        }
        Err(PatchError::CellNotFound {
            traveled_um: traveled,
        })
    }

    /// Suction with a holding ramp until the gigaseal threshold or timeout.
    ///
    /// Returns the sealing resistance; pressure is released on success.
    pub fn seal(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        self.set_state(rig, PatchState::Sealing);
        let result = self.seal_inner(rig);
        let resistance = self.conclude(rig, "sealing", result)?;
        self.set_state(rig, PatchState::Sealed);
        Ok(resistance)
    }

    fn seal_inner(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        let timeout = self.config.seal_timeout();
        let poll = self.config.seal_poll();
        let ramp = self.config.holding_ramp().as_secs_f64();
        let max_polls = (timeout.as_secs_f64() / poll.as_secs_f64()).ceil() as usize + 2;

        rig.pressure.set_pressure(self.config.seal_pressure_mbar)?;
        rig.report("Sealing");
        let start = rig.now();

        let mut resistance = 0.0;
        let mut elapsed = Duration::ZERO;
        for _ in 0..max_polls {
            rig.check_running()?;
            elapsed = rig.now().saturating_sub(start);
            let fraction = if ramp > 0.0 {
                (elapsed.as_secs_f64() / ramp).min(1.0)
            } else {
                1.0
            };
            rig.amplifier
                .set_holding(self.config.holding_volts * fraction)?;

            resistance = rig.resistance()?;
            if resistance > self.config.seal_threshold {
                rig.pressure.release()?;
                rig.report(format!(
                    "Gigaseal {} after {:.1} s",
                    format_resistance(resistance),
                    elapsed.as_secs_f64()
                ));
                return Ok(resistance);
            }
            if elapsed >= timeout {
                break;
            }
            rig.pause(poll.min(timeout - elapsed));
        }
        Err(PatchError::SealFailed {
            resistance,
            waited: elapsed,
        })
    }

    /// Rupture the sealed membrane with zap and suction pulses.
    ///
    /// Returns the whole-cell resistance.
    pub fn break_in(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        self.set_state(rig, PatchState::BreakingIn);
        let result = self.break_in_inner(rig);
        let resistance = self.conclude(rig, "break-in", result)?;
        self.set_state(rig, PatchState::Clamped);
        Ok(resistance)
    }

    fn break_in_inner(&mut self, rig: &mut Rig) -> PatchResult<f64> {
        let mut resistance = rig.resistance()?;
        if resistance <= self.config.seal_threshold {
            return Err(PatchError::SealNotAchieved { resistance });
        }

        let attempts = self.config.break_in_attempts;
        for attempt in 1..=attempts {
            rig.check_running()?;
            rig.report(format!("Break-in attempt {attempt}/{attempts}"));
            rig.amplifier.deliver_zap()?;
            rig.pressure
                .set_pressure(self.config.break_in_pressure_mbar)?;
            rig.pause(self.config.break_in_pulse());
            rig.pressure.release()?;
            rig.pause(self.config.break_in_wait());

            resistance = rig.resistance()?;
            if resistance < self.config.whole_cell_threshold {
                rig.amplifier.enable_resistance_metering(false)?;
                rig.amplifier.null_current()?;
                rig.report(format!(
                    "Whole-cell at {}",
                    format_resistance(resistance)
                ));
                return Ok(resistance);
            }
        }
        Err(PatchError::BreakInFailed {
            attempts,
            resistance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{Rig, RigDevices};
    use crate::telemetry::{DirectFrames, DirectMeter};
    use hardware::sim::{AmplifierState, SimAmplifier, SimPressure, SimStage};
    use hardware::Amplifier;
    use ndarray::Array2;
    use shared::camera_interface::mock::MockCameraInterface;
    use shared::camera_interface::CameraConfig;
    use shared::clock::{Clock, SimClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Bench {
        rig: Rig,
        clock: SimClock,
        arm: SimStage,
        amplifier: Arc<SimAmplifier>,
        pressure: Arc<SimPressure>,
    }

    /// Bench whose resistance model may observe the arm
    fn bench_with<F, M>(make_model: M) -> Bench
    where
        F: Fn(&AmplifierState, Duration) -> f64 + Send + Sync + 'static,
        M: FnOnce(SimStage) -> F,
    {
        let clock = SimClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let arm = SimStage::new("arm", shared.clone());
        let model = make_model(arm.clone());
        let amplifier = Arc::new(SimAmplifier::new(shared.clone(), Box::new(model)));
        let pressure = Arc::new(SimPressure::new(shared.clone()));
        let camera =
            MockCameraInterface::new_repeating(CameraConfig::new(8, 8), Array2::zeros((8, 8)));
        let rig = Rig::new(RigDevices {
            arm: Arc::new(arm.clone()),
            microscope: Arc::new(SimStage::new("microscope", shared.clone())),
            amplifier: amplifier.clone(),
            pressure: pressure.clone(),
            frames: Box::new(DirectFrames::new(camera)),
            resistance: Box::new(DirectMeter::new(amplifier.clone())),
            clock: shared,
        });
        Bench {
            rig,
            clock,
            arm,
            amplifier,
            pressure,
        }
    }

    fn bench<F>(model: F) -> Bench
    where
        F: Fn(&AmplifierState, Duration) -> f64 + Send + Sync + 'static,
    {
        bench_with(|_| model)
    }

    fn assert_safe(b: &Bench) {
        assert_eq!(b.pressure.current(), 0.0);
        assert!(!b.amplifier.state().holding_enabled);
    }

    #[test]
    fn test_precheck_accepts_baseline() {
        let mut b = bench(|_, _| 7e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());

        assert_eq!(seq.precheck(&mut b.rig).unwrap(), 7e6);
        assert_eq!(seq.baseline(), Some(7e6));
        assert_eq!(b.clock.now(), Duration::from_secs(4));
        assert_eq!(b.pressure.current(), 25.0);
        let state = b.amplifier.state();
        assert!(state.metering && state.holding_enabled);
        assert_eq!(state.offset_zeroed, 1);
    }

    #[test]
    fn test_precheck_rejects_broken_and_clogged() {
        let mut b = bench(|_, _| 3e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());
        assert!(matches!(
            seq.precheck(&mut b.rig),
            Err(PatchError::BrokenPipette { .. })
        ));
        assert_eq!(seq.baseline(), None);
        assert_eq!(seq.state(), PatchState::Idle);
        assert_safe(&b);

        let mut b = bench(|_, _| 12e6);
        assert!(matches!(
            seq.precheck(&mut b.rig),
            Err(PatchError::CloggedPipette { .. })
        ));
    }

    #[test]
    fn test_approach_requires_baseline() {
        let mut b = bench(|_, _| 7e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());

        assert!(matches!(
            seq.approach(&mut b.rig, -10.0, 1.0),
            Err(PatchError::NoBaseline)
        ));
        assert_eq!(b.arm.command_count(), 0);
    }

    #[test]
    fn test_approach_detects_confirmed_contact() {
        // Membrane 6 µm ahead of the start position along -X
        let mut b = bench_with(|arm| {
            move |_: &AmplifierState, _: Duration| {
                if arm.raw_position().x <= -6.0 {
                    9e6
                } else {
                    7e6
                }
            }
        });
        let mut seq = PatchSequencer::new(PatchConfig::default());
        seq.precheck(&mut b.rig).unwrap();

        let contact = seq.approach(&mut b.rig, -20.0, 1.0).unwrap();

        assert_eq!(contact, 9e6);
        assert_eq!(seq.state(), PatchState::Approaching);
        assert!((b.arm.raw_position().x + 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_approach_transient_rise_is_ignored() {
        // Resistance spikes once, then the arm passes the target
        let spikes = AtomicUsize::new(0);
        let mut b = bench(move |_, t| {
            if t > Duration::from_secs(5) && spikes.fetch_add(1, Ordering::SeqCst) < 3 {
                9e6
            } else {
                7e6
            }
        });
        let mut seq = PatchSequencer::new(PatchConfig::default());
        seq.precheck(&mut b.rig).unwrap();

        let err = seq.approach(&mut b.rig, -5.0, 1.0).unwrap_err();

        assert!(matches!(err, PatchError::CellNotFound { .. }));
        assert!(b.arm.raw_position().x < -5.0);
        assert_eq!(seq.baseline(), None);
        assert_safe(&b);
    }

    #[test]
    fn test_seal_succeeds_at_five_seconds() {
        let mut b = bench(|_, t| if t >= Duration::from_secs(5) { 2e9 } else { 9e6 });
        let mut seq = PatchSequencer::new(PatchConfig::default());

        let resistance = seq.seal(&mut b.rig).unwrap();

        assert_eq!(resistance, 2e9);
        assert_eq!(b.clock.now(), Duration::from_secs(5));
        assert_eq!(seq.state(), PatchState::Sealed);
        assert_eq!(b.pressure.current(), 0.0);
        assert_eq!(b.pressure.count_setpoint(-25.0), 1);

        // Holding ramps linearly: half of -70 mV at 5 s of a 10 s ramp
        let (_, last) = *b.amplifier.holding_log().last().unwrap();
        assert!((last + 0.035).abs() < 1e-12);
    }

    #[test]
    fn test_seal_fails_exactly_at_timeout() {
        let mut b = bench(|_, _| 9e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());

        let err = seq.seal(&mut b.rig).unwrap_err();

        match err {
            PatchError::SealFailed { waited, .. } => {
                assert_eq!(waited, Duration::from_secs(90))
            }
            other => panic!("expected SealFailed, got {other:?}"),
        }
        assert_eq!(b.clock.now(), Duration::from_secs(90));
        assert_eq!(seq.state(), PatchState::Idle);
        assert_safe(&b);

        // Ramp saturates at the holding target
        let (_, last) = *b.amplifier.holding_log().last().unwrap();
        assert!((last + 0.070).abs() < 1e-12);
    }

    #[test]
    fn test_break_in_bounded_attempts() {
        let mut b = bench(|_, _| 2e9);
        let mut seq = PatchSequencer::new(PatchConfig::default());

        let err = seq.break_in(&mut b.rig).unwrap_err();

        assert!(matches!(err, PatchError::BreakInFailed { attempts: 4, .. }));
        assert_eq!(b.amplifier.zap_count(), 4);
        assert_eq!(b.pressure.count_setpoint(-150.0), 4);
        assert_eq!(b.clock.now(), Duration::from_millis(4 * 1800));
        assert_safe(&b);
    }

    #[test]
    fn test_break_in_success_disables_metering() {
        let mut b = bench(|state, _| if state.zaps >= 2 { 150e6 } else { 2e9 });
        let mut seq = PatchSequencer::new(PatchConfig::default());
        b.amplifier.enable_resistance_metering(true).unwrap();

        let resistance = seq.break_in(&mut b.rig).unwrap();

        assert_eq!(resistance, 150e6);
        assert_eq!(seq.state(), PatchState::Clamped);
        let state = b.amplifier.state();
        assert!(!state.metering);
        assert!(state.current_nulled);
        assert_eq!(state.zaps, 2);
    }

    #[test]
    fn test_break_in_requires_seal() {
        let mut b = bench(|_, _| 50e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());

        assert!(matches!(
            seq.break_in(&mut b.rig),
            Err(PatchError::SealNotAchieved { .. })
        ));
        assert_eq!(b.amplifier.zap_count(), 0);
    }

    #[test]
    fn test_cancel_returns_to_safe_state() {
        let mut b = bench(|_, _| 9e6);
        let mut seq = PatchSequencer::new(PatchConfig::default());
        b.rig.pressure.set_pressure(-25.0).unwrap();
        b.rig.running_flag().store(false, Ordering::SeqCst);

        assert!(matches!(seq.seal(&mut b.rig), Err(PatchError::Cancelled)));
        assert_safe(&b);
    }
}
