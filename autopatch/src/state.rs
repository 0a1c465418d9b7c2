use hardware::Axis;
use serde::{Deserialize, Serialize};
use shared::image_proc::PixelPos;
use std::fmt;

/// Progress of the rig calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationState {
    #[default]
    Uncalibrated,
    CalibratingPlatform,
    CalibratingAxis(Axis),
    Calibrated,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CalibrationState::Uncalibrated => write!(f, "uncalibrated"),
            CalibrationState::CalibratingPlatform => write!(f, "calibrating platform"),
            CalibrationState::CalibratingAxis(axis) => write!(f, "calibrating arm axis {axis}"),
            CalibrationState::Calibrated => write!(f, "calibrated"),
        }
    }
}

/// Stage of a patch attempt.
///
/// `Sealed` is reached when a gigaseal forms and break-in is not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PatchState {
    #[default]
    Idle,
    Approaching,
    Sealing,
    Sealed,
    BreakingIn,
    Clamped,
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PatchState::Idle => "idle",
            PatchState::Approaching => "approaching",
            PatchState::Sealing => "sealing",
            PatchState::Sealed => "sealed",
            PatchState::BreakingIn => "breaking in",
            PatchState::Clamped => "clamped",
        };
        write!(f, "{name}")
    }
}

/// A user command waiting for the control loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingEvent {
    /// Move the tip to the clicked pixel
    Positioning(PixelPos),
    /// Position next to the clicked cell and patch it
    PatchClamp(PixelPos),
    /// Run the full calibration
    Calibration,
    /// Keep the tip on the clicked pixel until stopped
    Follow(PixelPos),
    StopFollow,
    /// Re-capture the template series
    TakeTemplate,
}

impl PendingEvent {
    /// Whether handling this event cancels follow mode
    pub fn cancels_follow(&self) -> bool {
        matches!(
            self,
            PendingEvent::Positioning(_)
                | PendingEvent::PatchClamp(_)
                | PendingEvent::Calibration
                | PendingEvent::StopFollow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            CalibrationState::CalibratingAxis(Axis::Y).to_string(),
            "calibrating arm axis Y"
        );
        assert_eq!(PatchState::BreakingIn.to_string(), "breaking in");
    }

    #[test]
    fn test_follow_cancellation() {
        assert!(PendingEvent::PatchClamp(PixelPos::new(1.0, 2.0)).cancels_follow());
        assert!(PendingEvent::Calibration.cancels_follow());
        assert!(!PendingEvent::TakeTemplate.cancels_follow());
        assert!(!PendingEvent::Follow(PixelPos::default()).cancels_follow());
    }
}
