//! Patch amplifier capability.

use crate::error::DeviceResult;

/// Voltage-clamp amplifier with a resistance meter
///
/// Holding potentials are in volts; resistances in ohms.
pub trait Amplifier: Send + Sync {
    fn enable_resistance_metering(&self, enabled: bool) -> DeviceResult<()>;

    /// Latest resistance meter value in ohms
    fn read_meter(&self) -> DeviceResult<f64>;

    fn set_holding(&self, volts: f64) -> DeviceResult<()>;

    fn set_holding_enabled(&self, enabled: bool) -> DeviceResult<()>;

    /// Zero the pipette offset potential
    fn auto_pipette_offset(&self) -> DeviceResult<()>;

    /// Null the holding current once in whole-cell
    fn null_current(&self) -> DeviceResult<()>;

    /// Deliver one brief high-voltage pulse
    fn deliver_zap(&self) -> DeviceResult<()>;
}

/// Human-readable resistance, e.g. `"5.23 MΩ"`
pub fn format_resistance(ohms: f64) -> String {
    let magnitude = ohms.abs();
    if magnitude < 1e3 {
        format!("{ohms:.2} Ω")
    } else if magnitude < 1e6 {
        format!("{:.2} kΩ", ohms / 1e3)
    } else if magnitude < 1e9 {
        format!("{:.2} MΩ", ohms / 1e6)
    } else {
        format!("{:.2} GΩ", ohms / 1e9)
    }
}
