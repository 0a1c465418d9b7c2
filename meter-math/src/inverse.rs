//! Checked matrix inversion
//!
//! nalgebra's `try_inverse` only fails on an exactly zero determinant. Probe
//! data is noisy, so near-singular matrices are rejected explicitly here.

use nalgebra::{Matrix2, Matrix3};
use thiserror::Error;

/// Error when matrix inversion fails due to singular matrix
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular matrix: determinant={determinant:.6e}")]
pub struct SingularMatrixError {
    /// The determinant value (zero or near-zero)
    pub determinant: f64,
}

/// Threshold below which a determinant is treated as zero
pub const DETERMINANT_EPSILON: f64 = 1e-10;

/// Inversion that refuses singular and near-singular matrices
pub trait CheckedInverse: Sized {
    /// Returns the inverse, or the offending determinant when it is within
    /// [`DETERMINANT_EPSILON`] of zero.
    fn checked_inverse(&self) -> Result<Self, SingularMatrixError>;
}

macro_rules! impl_checked_inverse {
    ($($matrix:ty),*) => {
        $(
            impl CheckedInverse for $matrix {
                fn checked_inverse(&self) -> Result<Self, SingularMatrixError> {
                    let determinant = self.determinant();
                    if !determinant.is_finite() || determinant.abs() < DETERMINANT_EPSILON {
                        return Err(SingularMatrixError { determinant });
                    }
                    self.try_inverse()
                        .ok_or(SingularMatrixError { determinant })
                }
            }
        )*
    };
}

impl_checked_inverse!(Matrix2<f64>, Matrix3<f64>);
