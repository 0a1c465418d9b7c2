//! 2x2 platform-to-camera matrices
//!
//! The platform rotation is built column by column from two probe moves. A
//! pair of nearly parallel columns means the probes did not span the image
//! plane and the result must not be used.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// Error when vectors are nearly parallel (degenerate configuration)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("degenerate vectors: angle between them is {angle_degrees:.2}°")]
pub struct DegenerateVectorsError {
    /// The angle between vectors in degrees
    pub angle_degrees: f64,
}

/// Compute the angle between two 2D vectors in degrees (0 to 180).
///
/// A zero-length vector yields 0°, so it is reported as degenerate by
/// [`matrix_from_columns_checked`].
pub fn angle_between_vectors(v1: &Vector2<f64>, v2: &Vector2<f64>) -> f64 {
    let mag1 = v1.norm();
    let mag2 = v2.norm();

    if mag1 < f64::EPSILON || mag2 < f64::EPSILON {
        return 0.0;
    }

    let cos_angle = (v1.dot(v2) / (mag1 * mag2)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees()
}

/// Build a 2x2 matrix from two column vectors with degeneracy check
///
/// # Arguments
/// * `col1` - First column vector
/// * `col2` - Second column vector
/// * `min_angle_degrees` - Minimum angle between vectors to accept
///
/// # Returns
/// * `Ok(Matrix2<f64>)` - Matrix with col1 and col2 as columns
/// * `Err(DegenerateVectorsError)` - If vectors are nearly parallel
pub fn matrix_from_columns_checked(
    col1: Vector2<f64>,
    col2: Vector2<f64>,
    min_angle_degrees: f64,
) -> Result<Matrix2<f64>, DegenerateVectorsError> {
    let angle = angle_between_vectors(&col1, &col2);
    let accepted = min_angle_degrees..=(180.0 - min_angle_degrees);

    if !accepted.contains(&angle) {
        return Err(DegenerateVectorsError {
            angle_degrees: angle,
        });
    }

    Ok(Matrix2::from_columns(&[col1, col2]))
}

/// Counter-clockwise rotation by `angle_rad`
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix2::new(c, -s, s, c)
}
