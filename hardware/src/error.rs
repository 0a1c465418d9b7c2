use crate::axis::Axis;
use std::time::Duration;
use thiserror::Error;

/// Faults reported by device implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// A bounded wait for motion completion expired
    #[error("{device}: axis {axis} did not settle within {waited:?}")]
    Timeout {
        device: String,
        axis: Axis,
        waited: Duration,
    },

    /// Transport or protocol failure talking to the device
    #[error("{device}: communication error: {message}")]
    Communication { device: String, message: String },

    /// A grouped command received a value list that does not match its axes
    #[error("group command has {axes} axes but {values} values")]
    GroupMismatch { axes: usize, values: usize },
}

pub type DeviceResult<T> = Result<T, DeviceError>;
