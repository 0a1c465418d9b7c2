//! meter-math - Small-matrix algorithms for rig calibration
//!
//! This crate provides the numeric building blocks used when calibrating a
//! micromanipulator rig against a camera:
//!
//! - **Inverse** - checked inversion of 2x2 and 3x3 matrices
//! - **Matrix2** - platform rotation construction with degeneracy checks
//! - **Matrix3** - column assembly and column norms for 3x3 transforms
//!
//! # Example
//!
//! ```text
//! use meter_math::{CheckedInverse, matrix_from_columns_checked};
//! use nalgebra::Vector2;
//!
//! let r = matrix_from_columns_checked(Vector2::x(), Vector2::y(), 5.0)?;
//! let r_inv = r.checked_inverse()?;
//! ```

pub mod inverse;
pub mod matrix2;
pub mod matrix3;

pub use inverse::{CheckedInverse, SingularMatrixError, DETERMINANT_EPSILON};
pub use matrix2::{
    angle_between_vectors, matrix_from_columns_checked, rotation_matrix, DegenerateVectorsError,
};
pub use matrix3::{column_norms, embed_planar, planar_block};
