//! Tunables for calibration and patching.
//!
//! Both config structs double as CLI argument groups (flatten them with
//! `#[command(flatten)]`) and as JSON sections of [`RigConfig`]. Times are in
//! seconds on the command line and exposed as [`Duration`] through accessors.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Parameters of the platform and arm calibration procedure
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    #[arg(
        long,
        default_value_t = 11,
        help = "Number of templates in the focus series (odd)",
        long_help = "Number of tip templates captured at 1 µm height steps around the \
            initial focus. Must be odd so the middle template is the zero offset."
    )]
    pub template_count: usize,

    #[arg(
        long,
        default_value_t = 0.09375,
        help = "Half-size of the template zone as a fraction of the frame"
    )]
    pub template_zone_fraction: f64,

    #[arg(
        long,
        default_value_t = 120.0,
        help = "Platform probe distance in µm"
    )]
    pub platform_distance_um: f64,

    #[arg(long, default_value_t = 2.0, help = "First arm probe step in µm")]
    pub first_step_um: f64,

    #[arg(
        long,
        default_value_t = 2000.0,
        help = "Maximum arm travel per axis in µm"
    )]
    pub max_travel_um: f64,

    #[arg(
        long,
        default_value_t = 32,
        help = "Maximum probe iterations per arm axis"
    )]
    pub max_probe_iterations: usize,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Pause after each probe move in seconds",
        long_help = "Time to wait after both devices report settled before a frame is \
            captured, letting vibrations and the video pipeline catch up."
    )]
    pub settle_secs: f64,

    #[arg(
        long,
        default_value_t = 5.0,
        help = "Minimum angle between platform axes in degrees"
    )]
    pub min_axis_angle_deg: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            template_count: 11,
            template_zone_fraction: 0.09375,
            platform_distance_um: 120.0,
            first_step_um: 2.0,
            max_travel_um: 2000.0,
            max_probe_iterations: 32,
            settle_secs: 0.5,
            min_axis_angle_deg: 5.0,
        }
    }
}

impl CalibrationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }
}

/// Parameters of the approach, seal, and break-in sequence
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Settling time before the baseline reading in seconds"
    )]
    pub baseline_settle_secs: f64,

    #[arg(long, default_value_t = 5e6, help = "Lowest acceptable pipette resistance in Ω")]
    pub min_pipette_resistance: f64,

    #[arg(long, default_value_t = 10e6, help = "Highest acceptable pipette resistance in Ω")]
    pub max_pipette_resistance: f64,

    #[arg(long, default_value_t = 25.0, help = "Positive pressure while approaching in mbar")]
    pub nearing_pressure_mbar: f64,

    #[arg(long, default_value_t = 1.0, help = "Approach step in µm")]
    pub approach_step_um: f64,

    #[arg(long, default_value_t = 0.2, help = "Pause after each approach step in seconds")]
    pub approach_settle_secs: f64,

    #[arg(
        long,
        default_value_t = 1.15,
        help = "Resistance ratio over baseline that signals contact"
    )]
    pub contact_ratio: f64,

    #[arg(
        long,
        default_value_t = 10.0,
        help = "Pause before confirming a contact reading in seconds"
    )]
    pub contact_confirm_secs: f64,

    #[arg(
        long,
        default_value_t = 15.0,
        help = "Stand-off distance before the approach in µm",
        long_help = "Distance along the withdrawal axis at which the tip is parked before \
            the 1 µm approach starts. Positioning moves stop this far short of the target."
    )]
    pub standoff_um: f64,

    #[arg(
        long,
        default_value_t = -25.0,
        allow_hyphen_values = true,
        help = "Sealing suction in mbar"
    )]
    pub seal_pressure_mbar: f64,

    #[arg(
        long,
        default_value_t = -0.070,
        allow_hyphen_values = true,
        help = "Holding potential reached by the seal ramp in volts"
    )]
    pub holding_volts: f64,

    #[arg(long, default_value_t = 10.0, help = "Holding ramp duration in seconds")]
    pub holding_ramp_secs: f64,

    #[arg(long, default_value_t = 1e9, help = "Gigaseal threshold in Ω")]
    pub seal_threshold: f64,

    #[arg(long, default_value_t = 90.0, help = "Seal timeout in seconds")]
    pub seal_timeout_secs: f64,

    #[arg(long, default_value_t = 0.25, help = "Resistance poll interval while sealing")]
    pub seal_poll_secs: f64,

    #[arg(long, default_value_t = 4, help = "Break-in attempts before giving up")]
    pub break_in_attempts: usize,

    #[arg(
        long,
        default_value_t = -150.0,
        allow_hyphen_values = true,
        help = "Break-in suction pulse in mbar"
    )]
    pub break_in_pressure_mbar: f64,

    #[arg(long, default_value_t = 0.5, help = "Break-in suction pulse length in seconds")]
    pub break_in_pulse_secs: f64,

    #[arg(
        long,
        default_value_t = 1.3,
        help = "Wait after each break-in attempt in seconds"
    )]
    pub break_in_wait_secs: f64,

    #[arg(
        long,
        default_value_t = 300e6,
        help = "Resistance below which the membrane is ruptured in Ω"
    )]
    pub whole_cell_threshold: f64,

    #[arg(long, help = "Proceed to break-in after a gigaseal")]
    pub clamp: bool,

    #[arg(long, default_value_t = 20.0, help = "Largest follow-mode move in µm")]
    pub follow_max_step_um: f64,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            baseline_settle_secs: 4.0,
            min_pipette_resistance: 5e6,
            max_pipette_resistance: 10e6,
            nearing_pressure_mbar: 25.0,
            approach_step_um: 1.0,
            approach_settle_secs: 0.2,
            contact_ratio: 1.15,
            contact_confirm_secs: 10.0,
            standoff_um: 15.0,
            seal_pressure_mbar: -25.0,
            holding_volts: -0.070,
            holding_ramp_secs: 10.0,
            seal_threshold: 1e9,
            seal_timeout_secs: 90.0,
            seal_poll_secs: 0.25,
            break_in_attempts: 4,
            break_in_pressure_mbar: -150.0,
            break_in_pulse_secs: 0.5,
            break_in_wait_secs: 1.3,
            whole_cell_threshold: 300e6,
            clamp: false,
            follow_max_step_um: 20.0,
        }
    }
}

impl PatchConfig {
    pub fn baseline_settle(&self) -> Duration {
        Duration::from_secs_f64(self.baseline_settle_secs)
    }

    pub fn approach_settle(&self) -> Duration {
        Duration::from_secs_f64(self.approach_settle_secs)
    }

    pub fn contact_confirm(&self) -> Duration {
        Duration::from_secs_f64(self.contact_confirm_secs)
    }

    pub fn holding_ramp(&self) -> Duration {
        Duration::from_secs_f64(self.holding_ramp_secs)
    }

    pub fn seal_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.seal_timeout_secs)
    }

    pub fn seal_poll(&self) -> Duration {
        Duration::from_secs_f64(self.seal_poll_secs)
    }

    pub fn break_in_pulse(&self) -> Duration {
        Duration::from_secs_f64(self.break_in_pulse_secs)
    }

    pub fn break_in_wait(&self) -> Duration {
        Duration::from_secs_f64(self.break_in_wait_secs)
    }
}

/// Complete rig configuration as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Controller identity; selects the calibration directory
    pub controller: String,
    pub calibration: CalibrationConfig,
    pub patch: PatchConfig,
}

impl RigConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        shared::config_storage::load_json(path)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        shared::config_storage::save_json(path, self)
    }
}
