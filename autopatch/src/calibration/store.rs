//! Plain-text calibration files, one directory per controller.
//!
//! - `jacobian.txt`, `rotation.txt`: 3 rows of 3 comma-separated values
//! - `data.txt`: µm per pixel, initial tip x and y, template offset x and y,
//!   one value per line
//!
//! A directory without these files is simply uncalibrated.

use crate::transform::{AxisTransform, TransformError};
use nalgebra::Matrix3;
use shared::config_storage::ConfigStorage;
use shared::image_proc::PixelPos;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const JACOBIAN_FILE: &str = "jacobian.txt";
pub const ROTATION_FILE: &str = "rotation.txt";
pub const DATA_FILE: &str = "data.txt";

const DATA_LINES: usize = 5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{file} line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("stored transform unusable: {0}")]
    Transform(#[from] TransformError),
}

/// Everything a calibration produces that outlives the session
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    pub jacobian: Matrix3<f64>,
    pub rotation: Matrix3<f64>,
    pub um_per_px: f64,
    /// Top-left of the centre template match at the calibration origin
    pub initial_tip: PixelPos,
    /// Tip position relative to a template's top-left corner
    pub template_offset: PixelPos,
}

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the calibration directory of `controller`
    pub fn for_controller(storage: &ConfigStorage, controller: &str) -> Self {
        Self::new(storage.calibration_dir(controller))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(&self, file: &str) -> impl FnOnce(io::Error) -> StoreError {
        let path = self.dir.join(file);
        move |source| StoreError::Io { path, source }
    }

    pub fn save(&self, data: &CalibrationData) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(self.io_error(""))?;

        AxisTransform::from_matrix(data.jacobian)
            .save(&self.dir.join(JACOBIAN_FILE))
            .map_err(self.io_error(JACOBIAN_FILE))?;
        AxisTransform::from_matrix(data.rotation)
            .save(&self.dir.join(ROTATION_FILE))
            .map_err(self.io_error(ROTATION_FILE))?;

        let values = [
            data.um_per_px,
            data.initial_tip.x,
            data.initial_tip.y,
            data.template_offset.x,
            data.template_offset.y,
        ];
        let text: String = values.iter().map(|v| format!("{v}\n")).collect();
        fs::write(self.dir.join(DATA_FILE), text).map_err(self.io_error(DATA_FILE))
    }

    /// Read a saved calibration; `Ok(None)` if any file is missing.
    ///
    /// Both matrices are checked for invertibility.
    pub fn load(&self) -> Result<Option<CalibrationData>, StoreError> {
        let all_present = [JACOBIAN_FILE, ROTATION_FILE, DATA_FILE]
            .iter()
            .all(|file| self.dir.join(file).is_file());
        if !all_present {
            return Ok(None);
        }

        let mut jacobian = AxisTransform::load(&self.dir.join(JACOBIAN_FILE))
            .map_err(self.io_error(JACOBIAN_FILE))?;
        let mut rotation = AxisTransform::load(&self.dir.join(ROTATION_FILE))
            .map_err(self.io_error(ROTATION_FILE))?;
        jacobian.invert()?;
        rotation.invert()?;

        let text =
            fs::read_to_string(self.dir.join(DATA_FILE)).map_err(self.io_error(DATA_FILE))?;
        let values = parse_data(&text)?;

        Ok(Some(CalibrationData {
            jacobian: *jacobian.matrix(),
            rotation: *rotation.matrix(),
            um_per_px: values[0],
            initial_tip: PixelPos::new(values[1], values[2]),
            template_offset: PixelPos::new(values[3], values[4]),
        }))
    }
}

fn parse_data(text: &str) -> Result<[f64; DATA_LINES], StoreError> {
    let parse_error = |line: usize, message: String| StoreError::Parse {
        file: DATA_FILE.to_string(),
        line,
        message,
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() != DATA_LINES {
        return Err(parse_error(
            lines.len(),
            format!("expected {DATA_LINES} values, found {}", lines.len()),
        ));
    }

    let mut values = [0.0_f64; DATA_LINES];
    for (i, line) in lines.iter().enumerate() {
        values[i] = line
            .trim()
            .parse()
            .map_err(|e| parse_error(i + 1, format!("{e}")))?;
    }
    if !(values[0].is_finite() && values[0] > 0.0) {
        return Err(parse_error(1, format!("invalid µm per pixel {}", values[0])));
    }
    Ok(values)
}
