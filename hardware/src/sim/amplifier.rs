use crate::amplifier::Amplifier;
use crate::error::DeviceResult;
use shared::clock::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Amplifier settings visible to a [`ResistanceModel`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmplifierState {
    pub metering: bool,
    pub holding_volts: f64,
    pub holding_enabled: bool,
    pub zaps: usize,
    pub offset_zeroed: usize,
    pub current_nulled: bool,
}

/// Resistance in ohms as a function of amplifier state and clock time
pub type ResistanceModel = Box<dyn Fn(&AmplifierState, Duration) -> f64 + Send + Sync>;

/// Amplifier whose meter reads from a caller-supplied model
pub struct SimAmplifier {
    clock: Arc<dyn Clock>,
    model: ResistanceModel,
    state: Mutex<AmplifierState>,
    holding_log: Mutex<Vec<(Duration, f64)>>,
}

impl SimAmplifier {
    pub fn new(clock: Arc<dyn Clock>, model: ResistanceModel) -> Self {
        Self {
            clock,
            model,
            state: Mutex::new(AmplifierState::default()),
            holding_log: Mutex::new(Vec::new()),
        }
    }

    /// Amplifier reporting a constant resistance
    pub fn constant(clock: Arc<dyn Clock>, ohms: f64) -> Self {
        Self::new(clock, Box::new(move |_, _| ohms))
    }

    fn lock_state(&self) -> MutexGuard<'_, AmplifierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> AmplifierState {
        self.lock_state().clone()
    }

    pub fn zap_count(&self) -> usize {
        self.lock_state().zaps
    }

    /// Holding setpoints with the clock time each was applied
    pub fn holding_log(&self) -> Vec<(Duration, f64)> {
        self.holding_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Amplifier for SimAmplifier {
    fn enable_resistance_metering(&self, enabled: bool) -> DeviceResult<()> {
        self.lock_state().metering = enabled;
        Ok(())
    }

    fn read_meter(&self) -> DeviceResult<f64> {
        let state = self.state();
        Ok((self.model)(&state, self.clock.now()))
    }

    fn set_holding(&self, volts: f64) -> DeviceResult<()> {
        self.lock_state().holding_volts = volts;
        self.holding_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.clock.now(), volts));
        Ok(())
    }

    fn set_holding_enabled(&self, enabled: bool) -> DeviceResult<()> {
        self.lock_state().holding_enabled = enabled;
        Ok(())
    }

    fn auto_pipette_offset(&self) -> DeviceResult<()> {
        self.lock_state().offset_zeroed += 1;
        Ok(())
    }

    fn null_current(&self) -> DeviceResult<()> {
        self.lock_state().current_nulled = true;
        Ok(())
    }

    fn deliver_zap(&self) -> DeviceResult<()> {
        let mut state = self.lock_state();
        state.zaps += 1;
        debug!("zap {} delivered", state.zaps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::clock::SimClock;

    #[test]
    fn test_model_sees_time_and_state() {
        let clock = SimClock::new();
        let amp = SimAmplifier::new(
            Arc::new(clock.clone()),
            Box::new(|state, t| {
                if state.zaps > 0 {
                    1.0
                } else {
                    t.as_secs_f64()
                }
            }),
        );

        clock.advance(Duration::from_secs(3));
        assert_eq!(amp.read_meter().unwrap(), 3.0);

        amp.deliver_zap().unwrap();
        assert_eq!(amp.read_meter().unwrap(), 1.0);
        assert_eq!(amp.zap_count(), 1);
    }

    #[test]
    fn test_holding_is_logged() {
        let clock = SimClock::new();
        let amp = SimAmplifier::constant(Arc::new(clock.clone()), 7e6);

        amp.set_holding(-0.01).unwrap();
        clock.advance(Duration::from_secs(1));
        amp.set_holding(-0.02).unwrap();

        assert_eq!(
            amp.holding_log(),
            vec![(Duration::ZERO, -0.01), (Duration::from_secs(1), -0.02)]
        );
        assert_eq!(amp.state().holding_volts, -0.02);
    }
}
