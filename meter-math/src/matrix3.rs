//! 3x3 helpers for the arm Jacobian and the embedded platform rotation.

use nalgebra::{Matrix2, Matrix3, Vector3};

/// Euclidean norm of each column
///
/// For a Jacobian this is the microscope travel, in µm, produced by one µm
/// of travel along each arm axis.
pub fn column_norms(matrix: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(
        matrix.column(0).norm(),
        matrix.column(1).norm(),
        matrix.column(2).norm(),
    )
}

/// Embed a planar (XY) transform in a 3x3 matrix with Z passed through.
pub fn embed_planar(planar: &Matrix2<f64>) -> Matrix3<f64> {
    let mut full = Matrix3::identity();
    full.fixed_view_mut::<2, 2>(0, 0).copy_from(planar);
    full
}

/// The upper-left XY block of a 3x3 matrix
pub fn planar_block(matrix: &Matrix3<f64>) -> Matrix2<f64> {
    matrix.fixed_view::<2, 2>(0, 0).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_column_norms() {
        let matrix = Matrix3::new(3.0, 0.0, 0.0, 4.0, 2.0, 0.0, 0.0, 0.0, -1.0);
        let norms = column_norms(&matrix);

        assert_relative_eq!(norms.x, 5.0, epsilon = 1e-12);
        assert_relative_eq!(norms.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(norms.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_embed_and_extract() {
        let planar = Matrix2::new(0.0, -1.0, 1.0, 0.0);
        let full = embed_planar(&planar);

        assert_relative_eq!(full[(2, 2)], 1.0);
        assert_relative_eq!(full[(0, 2)], 0.0);
        assert_relative_eq!(full[(2, 0)], 0.0);
        assert_relative_eq!(planar_block(&full), planar);
    }
}
