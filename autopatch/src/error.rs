use crate::calibration::StoreError;
use crate::transform::TransformError;
use hardware::{Axis, DeviceError};
use meter_math::SingularMatrixError;
use shared::camera_interface::CameraError;
use shared::image_proc::TemplateMatchError;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while calibrating the rig or running a patch attempt.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Frame or template dimensions cannot be matched.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A calibrated transform or scale is required but not available.
    #[error("rig is not calibrated")]
    NotCalibrated,

    /// No template series has been captured since start-up or load.
    #[error("no template series available; take templates first")]
    MissingTemplates,

    /// A transform could not be inverted.
    #[error("singular matrix: determinant={determinant:.6e}")]
    SingularMatrix {
        /// Determinant of the rejected matrix.
        determinant: f64,
    },

    /// No template in the series matched the live frame.
    #[error("autofocus failed: best template score {best_score:.3}")]
    FocusFailed {
        /// Highest score over the series.
        best_score: f64,
    },

    /// The tip could not be located after a platform probe.
    #[error("tip not found after platform move: score {score:.3}")]
    TipNotFound {
        /// Score of the best placement.
        score: f64,
    },

    /// Baseline resistance below the accepted window.
    #[error("pipette broken: baseline {resistance:.3e} Ω")]
    BrokenPipette { resistance: f64 },

    /// Baseline resistance above the accepted window.
    #[error("pipette clogged: baseline {resistance:.3e} Ω")]
    CloggedPipette { resistance: f64 },

    /// Approach requested without a validated baseline.
    #[error("no validated baseline resistance for this attempt")]
    NoBaseline,

    /// The arm passed its target without touching a cell.
    #[error("no cell contact after {traveled_um:.1} µm of approach")]
    CellNotFound {
        /// Arm travel during the approach.
        traveled_um: f64,
    },

    /// Resistance never crossed the seal threshold.
    #[error("seal failed: {resistance:.3e} Ω after {waited:?}")]
    SealFailed {
        /// Last reading.
        resistance: f64,
        /// Time spent sealing.
        waited: Duration,
    },

    /// Break-in requested without a gigaseal.
    #[error("seal not achieved: {resistance:.3e} Ω")]
    SealNotAchieved { resistance: f64 },

    /// Resistance stayed high through every break-in attempt.
    #[error("break-in failed after {attempts} attempts: {resistance:.3e} Ω")]
    BreakInFailed { attempts: usize, resistance: f64 },

    /// A device did not settle within its bound.
    #[error("{device}: axis {axis} timed out after {waited:?}")]
    DeviceTimeout {
        device: String,
        axis: Axis,
        waited: Duration,
    },

    /// Any other device fault.
    #[error("device error: {0}")]
    Device(DeviceError),

    /// Frame capture failed.
    #[error("camera error: {0}")]
    Camera(String),

    /// Calibration store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The control loop was stopped while the operation was in progress.
    #[error("operation cancelled")]
    Cancelled,
}

pub type PatchResult<T> = Result<T, PatchError>;

impl From<DeviceError> for PatchError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Timeout {
                device,
                axis,
                waited,
            } => PatchError::DeviceTimeout {
                device,
                axis,
                waited,
            },
            other => PatchError::Device(other),
        }
    }
}

impl From<SingularMatrixError> for PatchError {
    fn from(err: SingularMatrixError) -> Self {
        PatchError::SingularMatrix {
            determinant: err.determinant,
        }
    }
}

impl From<TransformError> for PatchError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Singular(e) => e.into(),
            TransformError::NotCalibrated | TransformError::MissingColumn(_) => {
                PatchError::NotCalibrated
            }
        }
    }
}

impl From<TemplateMatchError> for PatchError {
    fn from(err: TemplateMatchError) -> Self {
        match err {
            TemplateMatchError::InvalidImage(msg) => PatchError::InvalidImage(msg),
        }
    }
}

impl From<CameraError> for PatchError {
    fn from(err: CameraError) -> Self {
        PatchError::Camera(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_timeout_maps_to_own_variant() {
        let err: PatchError = DeviceError::Timeout {
            device: "arm".to_string(),
            axis: Axis::Z,
            waited: Duration::from_secs(5),
        }
        .into();

        assert!(matches!(err, PatchError::DeviceTimeout { axis: Axis::Z, .. }));
        assert_eq!(err.to_string(), "arm: axis Z timed out after 5s");
    }

    #[test]
    fn test_singular_transform_maps_to_singular_matrix() {
        let err: PatchError =
            TransformError::Singular(SingularMatrixError { determinant: 0.0 }).into();
        assert!(matches!(err, PatchError::SingularMatrix { .. }));

        let err: PatchError = TransformError::NotCalibrated.into();
        assert!(matches!(err, PatchError::NotCalibrated));
    }
}
