//! Exponential probing of one arm axis.
//!
//! The arm is stepped with doubling step sizes while the microscope follows
//! the tip: first by the current Jacobian estimate, then by autofocus in Z
//! and a pixel-error correction in XY. The column estimate is the ratio of
//! the microscope position to the arm position after each step, so later,
//! longer baselines dominate.

use super::TipModel;
use crate::autofocus::focus;
use crate::config::CalibrationConfig;
use crate::error::PatchResult;
use crate::rig::Rig;
use crate::templates::TemplateSeries;
use hardware::Axis;
use log::{debug, warn};
use nalgebra::Vector3;

/// Measure the Jacobian column of `axis`.
///
/// Arm and microscope are returned to zero afterwards, also on failure.
pub(super) fn probe_arm_axis(
    rig: &mut Rig,
    config: &CalibrationConfig,
    axis: Axis,
    model: &TipModel,
    templates: &TemplateSeries,
) -> PatchResult<Vector3<f64>> {
    let result = probe(rig, config, axis, model, templates);

    let returned = rig
        .arm
        .go_to_zero_group(&Axis::ALL)
        .and_then(|_| rig.microscope.go_to_zero_group(&Axis::ALL));
    match (&result, returned) {
        (Ok(_), Err(e)) => return Err(e.into()),
        (Err(_), Err(e)) => warn!("could not return to origin after failed probe: {e}"),
        _ => {}
    }
    rig.settle_all()?;
    result
}

fn probe(
    rig: &mut Rig,
    config: &CalibrationConfig,
    axis: Axis,
    model: &TipModel,
    templates: &TemplateSeries,
) -> PatchResult<Vector3<f64>> {
    let mut column = Vector3::zeros();
    let mut step = config.first_step_um;
    let mut traveled = 0.0;

    for iteration in 0..config.max_probe_iterations {
        if traveled >= config.max_travel_um {
            break;
        }
        rig.check_running()?;
        let step_now = step.min(config.max_travel_um - traveled);

        rig.arm.relative_move(step_now, axis)?;
        let follow = column * step_now;
        rig.microscope
            .relative_move_group(follow.as_slice(), &Axis::ALL)?;
        rig.settle_all()?;
        rig.pause(config.settle());

        let focused = focus(rig, templates)?;
        let correction = model.platform_correction(focused.location)?;
        rig.microscope
            .relative_move_group(&[correction.x, correction.y], &Axis::XY)?;
        rig.settle_microscope()?;

        traveled += step_now;
        let arm_position = rig.arm.position(axis)?;
        if arm_position.abs() > f64::EPSILON {
            column = rig.microscope_position()? / arm_position;
        }
        debug!(
            "arm {axis} probe {iteration}: {traveled:.0} µm, column ({:.4}, {:.4}, {:.4})",
            column.x, column.y, column.z
        );
        step *= 2.0;
    }

    Ok(column)
}
