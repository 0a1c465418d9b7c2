//! Linear map between two rig coordinate frames.
//!
//! An [`AxisTransform`] holds a 3x3 matrix built one column at a time from
//! probe measurements, plus the inverse once it has been computed. Changing a
//! column discards the inverse; [`AxisTransform::invert`] must succeed again
//! before [`AxisTransform::apply_inverse`] can be used.

use meter_math::{column_norms, embed_planar, CheckedInverse, SingularMatrixError};
use nalgebra::{Matrix2, Matrix3, Vector3};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Inverse requested before a successful [`AxisTransform::invert`]
    #[error("transform not calibrated")]
    NotCalibrated,

    /// Inversion requested with an unmeasured column
    #[error("column {0} has not been measured")]
    MissingColumn(usize),

    #[error(transparent)]
    Singular(#[from] SingularMatrixError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisTransform {
    matrix: Matrix3<f64>,
    populated: [bool; 3],
    inverse: Option<Matrix3<f64>>,
}

impl Default for AxisTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisTransform {
    /// Empty transform with no measured columns
    pub fn new() -> Self {
        Self {
            matrix: Matrix3::zeros(),
            populated: [false; 3],
            inverse: None,
        }
    }

    /// Transform with every column given; not yet inverted
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self {
            matrix,
            populated: [true; 3],
            inverse: None,
        }
    }

    /// Planar (platform) transform with Z passed through unchanged
    pub fn planar(matrix: &Matrix2<f64>) -> Self {
        Self::from_matrix(embed_planar(matrix))
    }

    pub fn set_column(&mut self, i: usize, column: &Vector3<f64>) {
        self.matrix.set_column(i, column);
        self.populated[i] = true;
        self.inverse = None;
    }

    pub fn column(&self, i: usize) -> Vector3<f64> {
        self.matrix.column(i).into_owned()
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn is_complete(&self) -> bool {
        self.populated.iter().all(|&p| p)
    }

    pub fn is_inverted(&self) -> bool {
        self.inverse.is_some()
    }

    /// Compute and store the inverse.
    ///
    /// On failure any previous inverse stays discarded.
    pub fn invert(&mut self) -> Result<(), TransformError> {
        self.inverse = None;
        if let Some(missing) = self.populated.iter().position(|&p| !p) {
            return Err(TransformError::MissingColumn(missing));
        }
        self.inverse = Some(self.matrix.checked_inverse()?);
        Ok(())
    }

    /// `M · v`
    pub fn apply(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * v
    }

    /// `M⁻¹ · v`
    pub fn apply_inverse(&self, v: &Vector3<f64>) -> Result<Vector3<f64>, TransformError> {
        self.inverse
            .map(|inverse| inverse * v)
            .ok_or(TransformError::NotCalibrated)
    }

    pub fn inverse(&self) -> Option<&Matrix3<f64>> {
        self.inverse.as_ref()
    }

    /// Norm of each column; the µm of output per unit of each input axis
    pub fn column_norms(&self) -> Vector3<f64> {
        column_norms(&self.matrix)
    }

    /// Write the matrix as three lines of three comma-separated values.
    ///
    /// Values use the shortest representation that parses back to the same
    /// `f64`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut text = String::new();
        for row in self.matrix.row_iter() {
            text.push_str(&format!("{},{},{}\n", row[0], row[1], row[2]));
        }
        fs::write(path, text)
    }

    /// Read a matrix written by [`AxisTransform::save`]
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_matrix(parse_matrix(&text)?))
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn parse_matrix(text: &str) -> io::Result<Matrix3<f64>> {
    let rows: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if rows.len() != 3 {
        return Err(invalid(format!("expected 3 rows, found {}", rows.len())));
    }

    let mut matrix = Matrix3::zeros();
    for (r, line) in rows.iter().enumerate() {
        let values = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("row {}: {e}", r + 1)))?;
        if values.len() != 3 {
            return Err(invalid(format!(
                "row {}: expected 3 values, found {}",
                r + 1,
                values.len()
            )));
        }
        for (c, value) in values.into_iter().enumerate() {
            matrix[(r, c)] = value;
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn probe_transform() -> AxisTransform {
        let mut t = AxisTransform::new();
        t.set_column(0, &Vector3::new(0.9, 0.05, -0.4));
        t.set_column(1, &Vector3::new(0.1, 0.95, 0.0));
        t.set_column(2, &Vector3::new(0.0, 0.0, 1.0));
        t
    }

    #[test]
    fn test_inverse_times_matrix_is_identity() {
        let mut t = probe_transform();
        t.invert().unwrap();

        let product = t.inverse().unwrap() * t.matrix();
        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-12);

        let v = Vector3::new(3.0, -2.0, 7.5);
        let back = t.apply_inverse(&t.apply(&v)).unwrap();
        assert_relative_eq!(back, v, epsilon = 1e-12);
    }

    #[test]
    fn test_collinear_columns_are_singular() {
        let mut t = AxisTransform::new();
        t.set_column(0, &Vector3::new(1.0, 2.0, 0.0));
        t.set_column(1, &Vector3::new(2.0, 4.0, 0.0));
        t.set_column(2, &Vector3::new(0.0, 0.0, 1.0));

        assert!(matches!(t.invert(), Err(TransformError::Singular(_))));
        assert_eq!(
            t.apply_inverse(&Vector3::x()),
            Err(TransformError::NotCalibrated)
        );
    }

    #[test]
    fn test_set_column_discards_inverse() {
        let mut t = probe_transform();
        t.invert().unwrap();
        assert!(t.is_inverted());

        t.set_column(2, &Vector3::new(0.0, 0.1, 1.1));
        assert!(!t.is_inverted());
        assert_eq!(
            t.apply_inverse(&Vector3::x()),
            Err(TransformError::NotCalibrated)
        );
    }

    #[test]
    fn test_incomplete_transform() {
        let mut t = AxisTransform::new();
        t.set_column(0, &Vector3::x());
        assert!(!t.is_complete());
        assert_eq!(t.invert(), Err(TransformError::MissingColumn(1)));
    }

    #[test]
    fn test_planar_passes_z_through() {
        let t = AxisTransform::planar(&Matrix2::new(0.0, -1.0, 1.0, 0.0));
        let out = t.apply(&Vector3::new(1.0, 0.0, 5.0));
        assert_relative_eq!(out, Vector3::new(0.0, 1.0, 5.0));
    }

    #[test]
    fn test_save_load_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jacobian.txt");
        let mut t = probe_transform();
        t.set_column(2, &Vector3::new(1.0 / 3.0, -2.0e-7, 0.1 + 0.2));

        t.save(&path).unwrap();
        let loaded = AxisTransform::load(&path).unwrap();

        assert_eq!(loaded.matrix(), t.matrix());
        assert!(loaded.is_complete());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().lines().count(),
            3
        );
    }

    #[test]
    fn test_load_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "1,0,0\n0,1\n0,0,1\n").unwrap();

        let err = AxisTransform::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
