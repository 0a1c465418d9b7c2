//! Camera abstraction layer for the microscope video feed
//!
//! Provides a unified interface for frame capture that can be backed by a
//! simulated rig (for testing) or an actual camera (for production). The rig
//! only ever needs the most recent frame, so the interface is capture-based
//! rather than queue-based.

pub mod mock;

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Timestamp represented as seconds and nanoseconds since an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

impl Timestamp {
    /// Create a timestamp from a Duration since epoch
    pub fn from_duration(duration: Duration) -> Self {
        let total_nanos = duration.as_nanos();
        let seconds = (total_nanos / 1_000_000_000) as u64;
        let nanos = (total_nanos % 1_000_000_000) as u64;
        Self { seconds, nanos }
    }

    /// Convert to Duration
    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Error type for camera operations
#[derive(Debug)]
pub enum CameraError {
    /// Hardware communication error
    HardwareError(String),
    /// Frame capture error
    CaptureError(String),
    /// Configuration error
    ConfigError(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CameraError::HardwareError(msg) => write!(f, "Hardware error: {msg}"),
            CameraError::CaptureError(msg) => write!(f, "Capture error: {msg}"),
            CameraError::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl Error for CameraError {}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;

/// How raw sensor frames must be flipped to match the on-screen view.
///
/// Depends on how the camera is mounted on a given microscope; calibration
/// is only valid for frames oriented the same way every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Frames are used as captured
    #[default]
    Identity,
    /// Mirror left-right
    FlipHorizontal,
    /// Mirror top-bottom
    FlipVertical,
    /// Mirror both axes (180° rotation)
    FlipBoth,
}

impl Orientation {
    /// Return a row-major copy of `frame` in display orientation
    pub fn apply(&self, frame: &ArrayView2<u16>) -> Array2<u16> {
        let view = match self {
            Orientation::Identity => frame.view(),
            Orientation::FlipHorizontal => frame.slice(s![.., ..;-1]),
            Orientation::FlipVertical => frame.slice(s![..;-1, ..]),
            Orientation::FlipBoth => frame.slice(s![..;-1, ..;-1]),
        };
        view.as_standard_layout().into_owned()
    }
}

/// Camera metadata returned with each frame
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number
    pub frame_number: u64,
    /// Exposure duration
    pub exposure: Duration,
    /// Timestamp when frame was captured
    pub timestamp: Timestamp,
}

/// Configuration for camera initialization
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Sensor width in pixels
    pub width: usize,
    /// Sensor height in pixels
    pub height: usize,
    /// Exposure duration
    pub exposure: Duration,
    /// Orientation applied to every frame before use
    pub orientation: Orientation,
}

impl CameraConfig {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            exposure: Duration::from_millis(30),
            orientation: Orientation::Identity,
        }
    }
}

/// Trait for unified camera interface
///
/// Frames are returned as captured by the sensor; callers apply
/// [`CameraInterface::orientation`] before interpreting pixel positions.
pub trait CameraInterface: Send {
    /// Capture a single frame
    ///
    /// # Returns
    /// * `Ok((frame, metadata))` containing the image data and metadata
    /// * `Err(CameraError)` if capture fails
    fn capture_frame(&mut self) -> CameraResult<(Array2<u16>, FrameMetadata)>;

    /// Get camera configuration
    fn get_config(&self) -> &CameraConfig;

    /// Flip convention for this camera's frames
    fn orientation(&self) -> Orientation {
        self.get_config().orientation
    }

    /// Check if camera is ready to capture
    fn is_ready(&self) -> bool;

    /// Get camera name/identifier
    fn name(&self) -> &str;

    /// Capture a frame and return it in display orientation
    fn capture_oriented(&mut self) -> CameraResult<Array2<u16>> {
        let (frame, _) = self.capture_frame()?;
        Ok(self.orientation().apply(&frame.view()))
    }
}

impl CameraInterface for Box<dyn CameraInterface> {
    fn capture_frame(&mut self) -> CameraResult<(Array2<u16>, FrameMetadata)> {
        (**self).capture_frame()
    }

    fn get_config(&self) -> &CameraConfig {
        (**self).get_config()
    }

    fn orientation(&self) -> Orientation {
        (**self).orientation()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
