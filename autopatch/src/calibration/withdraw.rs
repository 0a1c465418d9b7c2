//! Direction along arm X that pulls the pipette back toward its holder.

use nalgebra::{Matrix3, Vector2};
use shared::image_proc::PixelPos;

/// Withdrawal sign for arm X: `+1.0` if increasing X withdraws the tip.
///
/// The image motion of the tip for a +X arm move (microscope fixed) is
/// `-R·J[:, 0]` restricted to XY. Its dominant component decides which image
/// axis the pipette lies along. A zero template offset on that axis means
/// the template window, and so the pipette body, lies on the positive side
/// of the tip; otherwise it lies on the negative side. Withdrawing moves the
/// tip toward the body.
pub fn withdraw_sign(
    jacobian: &Matrix3<f64>,
    rotation: &Matrix3<f64>,
    template_offset: PixelPos,
) -> f64 {
    let arm_x = Vector2::new(jacobian[(0, 0)], jacobian[(1, 0)]);
    let planar = rotation.fixed_view::<2, 2>(0, 0);
    let motion = -(planar * arm_x);

    let i = if motion.x.abs() > motion.y.abs() { 0 } else { 1 };
    let body_negative = template_offset.component(i) != 0.0;
    let moves_positive = motion[i] > 0.0;

    if body_negative ^ moves_positive {
        1.0
    } else {
        -1.0
    }
}
