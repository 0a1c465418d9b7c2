//! Self-calibration of the camera, platform, and arm frames.
//!
//! Calibration runs in two phases from a common origin (the position of
//! both devices when it starts):
//!
//! 1. **Platform** - two microscope probes give the rotation from platform
//!    XY to pixels and the µm-per-pixel scale ([`TipModel`]).
//! 2. **Arm** - each arm axis is probed with exponentially growing steps
//!    while the microscope keeps the tip centred and focused, giving one
//!    column of the Jacobian per axis.
//!
//! A failure aborts only the stage in progress; committed results from
//! earlier stages are kept.

mod arm;
mod platform;
pub mod store;
pub mod withdraw;

pub use store::{CalibrationData, CalibrationStore, StoreError};
pub use withdraw::withdraw_sign;

use crate::autofocus::{self, FocusResult};
use crate::callback::StatusEvent;
use crate::config::CalibrationConfig;
use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use crate::state::CalibrationState;
use crate::templates::{capture_series, TemplateSeries};
use crate::transform::AxisTransform;
use hardware::Axis;
use log::{info, warn};
use nalgebra::Vector3;
use shared::image_proc::PixelPos;

/// Pixel model of the tip relative to the platform.
///
/// With the microscope at `m` and the tip at `w` (both microscope frame,
/// µm from the calibration origin) the tip appears at
/// `origin + R·(m - w) / um_per_px`, where `origin` is the tip pixel at the
/// calibration origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TipModel {
    rotation: AxisTransform,
    um_per_px: f64,
    initial_tip: PixelPos,
    template_offset: PixelPos,
}

impl TipModel {
    pub fn new(
        rotation: AxisTransform,
        um_per_px: f64,
        initial_tip: PixelPos,
        template_offset: PixelPos,
    ) -> PatchResult<Self> {
        if !rotation.is_inverted() {
            return Err(PatchError::NotCalibrated);
        }
        Ok(Self {
            rotation,
            um_per_px,
            initial_tip,
            template_offset,
        })
    }

    pub fn rotation(&self) -> &AxisTransform {
        &self.rotation
    }

    pub fn um_per_px(&self) -> f64 {
        self.um_per_px
    }

    /// Top-left of the centre template match at the origin
    pub fn initial_tip(&self) -> PixelPos {
        self.initial_tip
    }

    pub fn template_offset(&self) -> PixelPos {
        self.template_offset
    }

    /// Tip pixel at the calibration origin
    pub fn tip_origin(&self) -> PixelPos {
        self.initial_tip + self.template_offset
    }

    /// Platform frame displacement (µm) for an image displacement
    fn pixels_to_platform(&self, delta: PixelPos) -> PatchResult<Vector3<f64>> {
        let v = self
            .rotation
            .apply_inverse(&Vector3::new(delta.x, delta.y, 0.0))?;
        Ok(Vector3::new(v.x, v.y, 0.0) * self.um_per_px)
    }

    /// Microscope XY move bringing a template match at `location` back to
    /// where it was at the origin
    pub fn platform_correction(&self, location: PixelPos) -> PatchResult<Vector3<f64>> {
        self.pixels_to_platform(self.initial_tip - location)
    }

    /// Microscope-frame point that appears at `pixel` with the microscope at
    /// `microscope`, in the current focal plane
    pub fn target_from_pixel(
        &self,
        pixel: PixelPos,
        microscope: &Vector3<f64>,
    ) -> PatchResult<Vector3<f64>> {
        let shift = self.pixels_to_platform(self.tip_origin() - pixel)?;
        Ok(microscope + shift)
    }

    /// Tip displacement (µm) that moves the tip image from `tip` to `pixel`
    pub fn tip_shift_to(&self, tip: PixelPos, pixel: PixelPos) -> PatchResult<Vector3<f64>> {
        self.pixels_to_platform(tip - pixel)
    }
}

pub struct CalibrationEngine {
    config: CalibrationConfig,
    state: CalibrationState,
    model: Option<TipModel>,
    templates: Option<TemplateSeries>,
    jacobian: AxisTransform,
    withdraw_sign: f64,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            state: CalibrationState::Uncalibrated,
            model: None,
            templates: None,
            jacobian: AxisTransform::new(),
            withdraw_sign: 1.0,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    pub fn model(&self) -> PatchResult<&TipModel> {
        self.model.as_ref().ok_or(PatchError::NotCalibrated)
    }

    pub fn jacobian(&self) -> &AxisTransform {
        &self.jacobian
    }

    pub fn templates(&self) -> Option<&TemplateSeries> {
        self.templates.as_ref()
    }

    /// `+1.0` if increasing arm X withdraws the pipette
    pub fn withdraw_sign(&self) -> f64 {
        self.withdraw_sign
    }

    fn set_state(&mut self, rig: &Rig, state: CalibrationState) {
        if self.state != state {
            info!("calibration: {} -> {}", self.state, state);
        }
        self.state = state;
        rig.emit(StatusEvent::Calibration(state));
    }

    /// State implied by the results committed so far
    fn settled_state(&self) -> CalibrationState {
        if self.model.is_some() && self.jacobian.is_inverted() {
            CalibrationState::Calibrated
        } else {
            CalibrationState::Uncalibrated
        }
    }

    /// Return to the settled state and report a failed stage
    fn fail(&mut self, rig: &Rig, stage: &str, err: PatchError) -> PatchError {
        let state = self.settled_state();
        self.set_state(rig, state);
        warn!("{stage} failed: {err}");
        rig.emit(StatusEvent::Failed {
            stage: stage.to_string(),
            reason: err.to_string(),
        });
        err
    }

    /// Full calibration: platform, the three arm axes, then finalization
    pub fn calibrate(&mut self, rig: &mut Rig) -> PatchResult<()> {
        self.calibrate_platform(rig)?;
        for axis in Axis::ALL {
            self.calibrate_arm_axis(rig, axis)?;
        }
        self.finish(rig)
    }

    /// Capture templates and measure the platform rotation and scale at the
    /// current position, which becomes the calibration origin
    pub fn calibrate_platform(&mut self, rig: &mut Rig) -> PatchResult<()> {
        self.set_state(rig, CalibrationState::CalibratingPlatform);
        rig.report("Calibrating platform");

        let result = platform::calibrate_platform(rig, &self.config).and_then(|p| {
            let model = TipModel::new(
                p.rotation,
                p.um_per_px,
                p.initial_tip,
                p.templates.tip_offset(),
            )?;
            Ok((model, p.templates))
        });
        let (model, templates) = match result {
            Ok(r) => r,
            Err(e) => return Err(self.fail(rig, "platform calibration", e)),
        };

        rig.report(format!(
            "Platform calibrated: {:.3} µm/px, tip at ({:.0}, {:.0})",
            model.um_per_px(),
            model.tip_origin().x,
            model.tip_origin().y
        ));
        self.model = Some(model);
        self.templates = Some(templates);
        // Arm columns measured against an earlier platform are stale
        self.jacobian = AxisTransform::new();
        Ok(())
    }

    /// Measure the Jacobian column of one arm axis.
    ///
    /// Requires a platform calibration and templates. The column is only
    /// committed when the probe completes.
    pub fn calibrate_arm_axis(&mut self, rig: &mut Rig, axis: Axis) -> PatchResult<()> {
        let (model, templates) = match (&self.model, &self.templates) {
            (Some(m), Some(t)) => (m.clone(), t.clone()),
            (None, _) => return Err(PatchError::NotCalibrated),
            (_, None) => return Err(PatchError::MissingTemplates),
        };
        self.set_state(rig, CalibrationState::CalibratingAxis(axis));
        rig.report(format!("Calibrating arm axis {axis}"));

        match arm::probe_arm_axis(rig, &self.config, axis, &model, &templates) {
            Ok(column) => {
                rig.report(format!(
                    "Arm {axis}: ({:.4}, {:.4}, {:.4})",
                    column.x, column.y, column.z
                ));
                self.jacobian.set_column(axis.index(), &column);
                Ok(())
            }
            Err(e) => Err(self.fail(rig, &format!("arm axis {axis} calibration"), e)),
        }
    }

    /// Invert the Jacobian, derive the withdrawal sign, and mark calibrated
    pub fn finish(&mut self, rig: &mut Rig) -> PatchResult<()> {
        let model = self.model()?.clone();
        if let Err(e) = self.jacobian.invert() {
            return Err(self.fail(rig, "calibration", e.into()));
        }
        self.withdraw_sign = withdraw_sign(
            self.jacobian.matrix(),
            model.rotation().matrix(),
            model.template_offset(),
        );

        let norms = self.jacobian.column_norms();
        rig.report(format!(
            "Calibrated; arm axis gains ({:.3}, {:.3}, {:.3}) µm/µm, withdraw sign {:+}",
            norms.x, norms.y, norms.z, self.withdraw_sign
        ));
        self.set_state(rig, CalibrationState::Calibrated);
        Ok(())
    }

    /// Re-capture the template series at the current position
    pub fn take_templates(&mut self, rig: &mut Rig) -> PatchResult<()> {
        let series = match capture_series(rig, &self.config) {
            Ok(series) => series,
            Err(e) => return Err(self.fail(rig, "template capture", e)),
        };
        // The tip pixel at the origin is fixed; only its split between the
        // match corner and the offset changes
        if let Some(model) = self.model.as_mut() {
            let origin = model.tip_origin();
            model.template_offset = series.tip_offset();
            model.initial_tip = origin - model.template_offset;
        }
        self.templates = Some(series);
        Ok(())
    }

    /// Autofocus with the current template series
    pub fn focus(&self, rig: &mut Rig) -> PatchResult<FocusResult> {
        let templates = self.templates.as_ref().ok_or(PatchError::MissingTemplates)?;
        autofocus::focus(rig, templates)
    }

    /// Calibration results for persistence, once calibrated
    pub fn data(&self) -> Option<CalibrationData> {
        let model = self.model.as_ref()?;
        if !self.is_calibrated() {
            return None;
        }
        Some(CalibrationData {
            jacobian: *self.jacobian.matrix(),
            rotation: *model.rotation().matrix(),
            um_per_px: model.um_per_px(),
            initial_tip: model.initial_tip(),
            template_offset: model.template_offset(),
        })
    }

    /// Adopt stored results, re-deriving inverses and the withdrawal sign.
    ///
    /// Templates are not stored; take them again before autofocus is used.
    pub fn restore(&mut self, data: &CalibrationData) -> PatchResult<()> {
        let mut rotation = AxisTransform::from_matrix(data.rotation);
        rotation.invert()?;
        let mut jacobian = AxisTransform::from_matrix(data.jacobian);
        jacobian.invert()?;

        self.model = Some(TipModel::new(
            rotation,
            data.um_per_px,
            data.initial_tip,
            data.template_offset,
        )?);
        self.withdraw_sign = withdraw_sign(&data.jacobian, &data.rotation, data.template_offset);
        self.jacobian = jacobian;
        self.state = CalibrationState::Calibrated;
        Ok(())
    }
}
