//! Scripted camera for tests.

use super::{CameraConfig, CameraError, CameraInterface, CameraResult, FrameMetadata, Timestamp};
use ndarray::Array2;
use std::time::Duration;

/// Plays back a fixed list of frames.
///
/// With a single frame the camera repeats it forever; with several it plays
/// them in order and then reports a capture error.
pub struct MockCameraInterface {
    config: CameraConfig,
    frames: Vec<Array2<u16>>,
    frame_index: usize,
    frame_count: u64,
    elapsed_time: Duration,
}

impl MockCameraInterface {
    pub fn new(config: CameraConfig, frames: Vec<Array2<u16>>) -> Self {
        Self {
            config,
            frames,
            frame_index: 0,
            frame_count: 0,
            elapsed_time: Duration::ZERO,
        }
    }

    pub fn new_repeating(config: CameraConfig, frame: Array2<u16>) -> Self {
        Self::new(config, vec![frame])
    }

    /// Number of frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn reset(&mut self) {
        self.frame_index = 0;
        self.frame_count = 0;
        self.elapsed_time = Duration::ZERO;
    }

    fn next_frame(&mut self) -> CameraResult<Array2<u16>> {
        if self.frames.len() == 1 {
            return Ok(self.frames[0].clone());
        }

        let frame = self
            .frames
            .get(self.frame_index)
            .cloned()
            .ok_or_else(|| CameraError::CaptureError("No more frames".to_string()))?;
        self.frame_index += 1;
        Ok(frame)
    }
}

impl CameraInterface for MockCameraInterface {
    fn capture_frame(&mut self) -> CameraResult<(Array2<u16>, FrameMetadata)> {
        let frame = self.next_frame()?;
        self.elapsed_time += self.config.exposure;
        self.frame_count += 1;

        let metadata = FrameMetadata {
            frame_number: self.frame_count,
            exposure: self.config.exposure,
            timestamp: Timestamp::from_duration(self.elapsed_time),
        };
        Ok((frame, metadata))
    }

    fn get_config(&self) -> &CameraConfig {
        &self.config
    }

    fn is_ready(&self) -> bool {
        !self.frames.is_empty()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_interface::Orientation;

    fn config() -> CameraConfig {
        CameraConfig::new(4, 2)
    }

    #[test]
    fn test_repeating_frame() {
        let frame = Array2::from_elem((2, 4), 7u16);
        let mut camera = MockCameraInterface::new_repeating(config(), frame.clone());

        for _ in 0..3 {
            let (captured, _) = camera.capture_frame().unwrap();
            assert_eq!(captured, frame);
        }
        assert_eq!(camera.frame_count(), 3);
    }

    #[test]
    fn test_sequence_runs_out() {
        let frames = vec![Array2::zeros((2, 4)), Array2::ones((2, 4))];
        let mut camera = MockCameraInterface::new(config(), frames);

        let (_, first) = camera.capture_frame().unwrap();
        let (second, meta) = camera.capture_frame().unwrap();
        assert_eq!(first.frame_number, 1);
        assert_eq!(meta.frame_number, 2);
        assert_eq!(second[[0, 0]], 1);
        assert!(matches!(
            camera.capture_frame(),
            Err(CameraError::CaptureError(_))
        ));
    }

    #[test]
    fn test_capture_oriented_applies_flip() {
        let mut cfg = config();
        cfg.orientation = Orientation::FlipHorizontal;
        let mut frame = Array2::zeros((2, 4));
        frame[[0, 0]] = 9u16;
        let mut camera = MockCameraInterface::new_repeating(cfg, frame);

        let oriented = camera.capture_oriented().unwrap();
        assert_eq!(oriented[[0, 3]], 9);
        assert_eq!(oriented[[0, 0]], 0);
    }
}
