//! Platform (microscope XY) to camera calibration.

use crate::config::CalibrationConfig;
use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use crate::templates::{capture_series, TemplateSeries};
use crate::transform::AxisTransform;
use hardware::Axis;
use log::debug;
use meter_math::matrix_from_columns_checked;
use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;
use shared::image_proc::{match_template, PixelPos};

pub(super) struct PlatformCalibration {
    pub rotation: AxisTransform,
    pub um_per_px: f64,
    pub initial_tip: PixelPos,
    pub templates: TemplateSeries,
}

/// Locate `template` in the latest frame or fail with `TipNotFound`
pub(super) fn locate_tip(rig: &mut Rig, template: &Array2<u16>) -> PatchResult<PixelPos> {
    let frame = rig.frame()?;
    let m = match_template(&frame.view(), &template.view())?;
    if !m.found {
        return Err(PatchError::TipNotFound { score: m.score });
    }
    Ok(m.location)
}

/// Move the microscope along `axis`, measure the tip's image displacement,
/// and move back. The microscope returns to zero even when the measurement
/// fails.
fn probe_axis(
    rig: &mut Rig,
    config: &CalibrationConfig,
    axis: Axis,
    template: &Array2<u16>,
    initial_tip: PixelPos,
) -> PatchResult<Vector2<f64>> {
    rig.check_running()?;
    rig.microscope
        .relative_move(config.platform_distance_um, axis)?;

    let measured = rig
        .microscope
        .wait_until_settled(axis)
        .map_err(PatchError::from)
        .and_then(|_| {
            rig.pause(config.settle());
            locate_tip(rig, template)
        });

    rig.microscope.go_to_zero(axis)?;
    rig.microscope.wait_until_settled(axis)?;

    let shift = measured? - initial_tip;
    debug!("platform {axis}: tip moved ({:.1}, {:.1}) px", shift.x, shift.y);
    Ok(Vector2::new(shift.x, shift.y))
}

/// Rotation, scale, and templates from two platform probes.
///
/// Both devices are zeroed at the current position first; that position
/// becomes the calibration origin.
pub(super) fn calibrate_platform(
    rig: &mut Rig,
    config: &CalibrationConfig,
) -> PatchResult<PlatformCalibration> {
    rig.arm.set_zero_group(&Axis::ALL)?;
    rig.microscope.set_zero_group(&Axis::ALL)?;

    let templates = capture_series(rig, config)?;
    let initial_tip = locate_tip(rig, templates.center())?;

    let mut columns = [Vector2::zeros(); 2];
    let mut um_per_px = 0.0;
    for (i, axis) in Axis::XY.into_iter().enumerate() {
        let shift = probe_axis(rig, config, axis, templates.center(), initial_tip)?;
        let pixels = shift.norm();
        if pixels < 1.0 {
            // The tip did not visibly move; no direction can be derived
            return Err(PatchError::SingularMatrix { determinant: 0.0 });
        }
        columns[i] = shift / pixels;
        um_per_px += config.platform_distance_um / pixels / 2.0;
        rig.report(format!(
            "Platform {axis}: {pixels:.1} px for {:.0} µm",
            config.platform_distance_um
        ));
    }

    let planar = matrix_from_columns_checked(columns[0], columns[1], config.min_axis_angle_deg)
        .map_err(|_| PatchError::SingularMatrix {
            determinant: Matrix2::from_columns(&columns).determinant(),
        })?;
    let mut rotation = AxisTransform::planar(&planar);
    rotation.invert()?;

    Ok(PlatformCalibration {
        rotation,
        um_per_px,
        initial_tip,
        templates,
    })
}
