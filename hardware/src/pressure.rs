//! Pipette pressure control.

use crate::error::DeviceResult;

/// Pneumatic controller on the pipette line, pressures in mbar
pub trait PressureController: Send + Sync {
    fn set_pressure(&self, mbar: f64) -> DeviceResult<()>;

    /// Measured line pressure in mbar
    fn measure(&self) -> DeviceResult<f64>;

    /// Vent to atmospheric pressure
    fn release(&self) -> DeviceResult<()> {
        self.set_pressure(PressurePreset::Release.mbar())
    }

    fn apply(&self, preset: PressurePreset) -> DeviceResult<()> {
        self.set_pressure(preset.mbar())
    }
}

/// Standard pressures used during a patch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressurePreset {
    /// Vent
    Release,
    /// Light positive pressure keeping the tip clean while approaching
    Nearing,
    /// Light suction to form the seal
    Seal,
    /// Suction pulse to rupture the membrane
    BreakIn,
    /// Strong positive pressure to clear a clogged tip
    High,
}

impl PressurePreset {
    pub fn mbar(self) -> f64 {
        match self {
            PressurePreset::Release => 0.0,
            PressurePreset::Nearing => 25.0,
            PressurePreset::Seal => -25.0,
            PressurePreset::BreakIn => -150.0,
            PressurePreset::High => 800.0,
        }
    }
}
