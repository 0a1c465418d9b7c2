use crate::error::DeviceResult;
use crate::pressure::PressureController;
use shared::clock::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pressure controller that reaches its setpoint instantly and keeps a log
pub struct SimPressure {
    clock: Arc<dyn Clock>,
    history: Mutex<Vec<(Duration, f64)>>,
}

impl SimPressure {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every setpoint with the clock time it was applied
    pub fn history(&self) -> Vec<(Duration, f64)> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current setpoint, 0 if never set
    pub fn current(&self) -> f64 {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .map(|&(_, mbar)| mbar)
            .unwrap_or(0.0)
    }

    /// How many times `mbar` was commanded
    pub fn count_setpoint(&self, mbar: f64) -> usize {
        self.history()
            .iter()
            .filter(|(_, p)| (*p - mbar).abs() < 1e-9)
            .count()
    }
}

impl PressureController for SimPressure {
    fn set_pressure(&self, mbar: f64) -> DeviceResult<()> {
        let now = self.clock.now();
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((now, mbar));
        Ok(())
    }

    fn measure(&self) -> DeviceResult<f64> {
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pressure::PressurePreset;
    use shared::clock::SimClock;

    #[test]
    fn test_setpoints_are_logged() {
        let clock = SimClock::new();
        let pump = SimPressure::new(Arc::new(clock.clone()));

        pump.apply(PressurePreset::Nearing).unwrap();
        clock.advance(Duration::from_secs(1));
        pump.release().unwrap();

        assert_eq!(pump.measure().unwrap(), 0.0);
        assert_eq!(
            pump.history(),
            vec![(Duration::ZERO, 25.0), (Duration::from_secs(1), 0.0)]
        );
        assert_eq!(pump.count_setpoint(25.0), 1);
    }
}
