//! Arm moves expressed in the microscope frame.

use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use crate::transform::AxisTransform;
use hardware::Axis;
use log::debug;
use nalgebra::Vector3;

/// Tip travel per intermediate waypoint of a straight-line move, µm
pub const LINEAR_STEP_UM: f64 = 10.0;

fn move_arm_to(rig: &Rig, jacobian: &AxisTransform, tip: &Vector3<f64>) -> PatchResult<()> {
    let arm = jacobian.apply_inverse(tip)?;
    rig.arm.absolute_move_group(arm.as_slice(), &Axis::ALL)?;
    rig.settle_arm()
}

/// Move the tip along a straight line from `from` to `to` (microscope
/// frame), with a waypoint every [`LINEAR_STEP_UM`].
///
/// `from` may be a hypothetical position; the first waypoint is commanded
/// as an absolute arm position either way.
pub fn linear_move(
    rig: &Rig,
    jacobian: &AxisTransform,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
) -> PatchResult<()> {
    let delta = to - from;
    let distance = delta.norm();
    let waypoints = (distance / LINEAR_STEP_UM).floor() as usize;
    debug!("linear move of {distance:.1} µm in {} legs", waypoints + 1);

    for k in 1..=waypoints {
        rig.check_running()?;
        let point = from + delta * (k as f64 * LINEAR_STEP_UM / distance);
        move_arm_to(rig, jacobian, &point)?;
    }
    rig.check_running()?;
    move_arm_to(rig, jacobian, to)
}

/// Current tip position in the microscope frame
pub fn tip_position(rig: &Rig, jacobian: &AxisTransform) -> PatchResult<Vector3<f64>> {
    Ok(jacobian.apply(&rig.arm_position()?))
}

/// Park the tip `standoff_um` back along arm X from `target` (microscope
/// frame), ready for an approach.
///
/// The pipette is first withdrawn along arm X by the stand-off distance so
/// it clears the sample, then moved in a straight line to the stand-off
/// point. Returns the arm position of `target`.
pub fn move_to_standoff(
    rig: &Rig,
    jacobian: &AxisTransform,
    target: &Vector3<f64>,
    withdraw_sign: f64,
    standoff_um: f64,
) -> PatchResult<Vector3<f64>> {
    let arm_target = jacobian.apply_inverse(target)?;
    let gain = jacobian.column(Axis::X.index()).norm();
    if gain <= f64::EPSILON {
        return Err(PatchError::NotCalibrated);
    }
    let standoff_arm = standoff_um / gain;
    let arm_standoff = arm_target + Vector3::x() * (withdraw_sign * standoff_arm);

    rig.arm.relative_move(withdraw_sign * standoff_arm, Axis::X)?;
    rig.arm.wait_until_settled(Axis::X)?;

    let from = tip_position(rig, jacobian)?;
    linear_move(rig, jacobian, &from, &jacobian.apply(&arm_standoff))?;
    Ok(arm_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::test_support::sim_rig;
    use approx::assert_relative_eq;
    use hardware::sim::SimRigConfig;
    use nalgebra::Matrix3;

    fn jacobian() -> AxisTransform {
        let mut j = AxisTransform::from_matrix(Matrix3::new(
            0.9, 0.1, 0.0, 0.05, 0.95, 0.0, -0.4, 0.0, 1.0,
        ));
        j.invert().unwrap();
        j
    }

    #[test]
    fn test_linear_move_reaches_target_in_steps() {
        let (sim, rig, _) = sim_rig(SimRigConfig::default());
        let j = jacobian();
        let target = Vector3::new(25.0, -10.0, 3.0);

        linear_move(&rig, &j, &Vector3::zeros(), &target).unwrap();

        assert_relative_eq!(sim.tip_position(), target, epsilon = 1e-9);
        // Two waypoints plus the final leg, three axes each
        assert_eq!(sim.arm.command_count(), 9);
    }

    #[test]
    fn test_standoff_is_behind_target() {
        let (sim, rig, _) = sim_rig(SimRigConfig::default());
        let j = jacobian();
        let target = Vector3::new(30.0, -20.0, -5.0);

        let arm_target = move_to_standoff(&rig, &j, &target, 1.0, 15.0).unwrap();

        let gain = j.column(0).norm();
        let arm = sim.arm.raw_position();
        assert_relative_eq!(arm.x - arm_target.x, 15.0 / gain, epsilon = 1e-9);
        assert_relative_eq!(arm.y, arm_target.y, epsilon = 1e-9);
        assert_relative_eq!(arm.z, arm_target.z, epsilon = 1e-9);
        assert_relative_eq!(
            (sim.tip_position() - target).norm(),
            15.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_uninverted_jacobian_refused() {
        let (sim, rig, _) = sim_rig(SimRigConfig::default());
        let j = AxisTransform::from_matrix(Matrix3::identity());

        assert!(matches!(
            linear_move(&rig, &j, &Vector3::zeros(), &Vector3::x()),
            Err(PatchError::NotCalibrated)
        ));
        assert_eq!(sim.arm.command_count(), 0);
    }
}
