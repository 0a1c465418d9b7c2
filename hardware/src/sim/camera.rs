use super::stage::SimStage;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use ndarray::Array2;
use shared::camera_interface::{
    CameraConfig, CameraInterface, CameraResult, FrameMetadata, Timestamp,
};
use shared::clock::Clock;
use std::sync::Arc;

/// Geometry and appearance of the simulated pipette under the microscope
#[derive(Debug, Clone)]
pub struct OpticsModel {
    /// Microscope displacement that follows one µm of each arm axis
    pub jacobian: Matrix3<f64>,
    /// Pixel direction of a microscope X/Y move, per column
    pub rotation: Matrix2<f64>,
    /// Scale of the image
    pub um_per_px: f64,
    /// Half-width of the tip at perfect focus, pixels
    pub tip_half_width_px: f64,
    /// Change of apparent tip half-width per µm of defocus (signed)
    pub widening_px_per_um: f64,
    /// Growth of the body half-width per pixel away from the tip
    pub taper: f64,
    /// Edge softness at perfect focus, pixels
    pub edge_softness_px: f64,
    /// Extra softness per µm of defocus (either sign)
    pub blur_px_per_um: f64,
    /// Edge brightening per µm of defocus. Above focus the outline turns
    /// bright, below focus it turns dark.
    pub rim_per_um: f64,
    /// Direction the pipette body extends from the tip, degrees in image
    /// coordinates (x right, y down)
    pub body_angle_deg: f64,
    pub background: f64,
    pub silhouette_depth: f64,
}

impl Default for OpticsModel {
    fn default() -> Self {
        Self {
            jacobian: Matrix3::identity(),
            rotation: Matrix2::identity(),
            um_per_px: 1.0,
            tip_half_width_px: 2.0,
            widening_px_per_um: 0.5,
            taper: 0.3,
            edge_softness_px: 0.6,
            blur_px_per_um: 0.5,
            rim_per_um: 150.0,
            body_angle_deg: 225.0,
            background: 2000.0,
            silhouette_depth: 1500.0,
        }
    }
}

impl OpticsModel {
    /// Tip position in the image and its defocus (µm, positive when the
    /// focal plane is above the tip) for the given raw stage positions.
    pub fn tip_view(
        &self,
        frame_center: Vector2<f64>,
        arm: &Vector3<f64>,
        microscope: &Vector3<f64>,
    ) -> (Vector2<f64>, f64) {
        let tip = self.jacobian * arm;
        let relative = microscope - tip;
        let shift = self.rotation * Vector2::new(relative.x, relative.y) / self.um_per_px;
        (frame_center + shift, relative.z)
    }

    /// Draw the pipette silhouette with its tip at `tip`
    pub fn render(
        &self,
        width: usize,
        height: usize,
        tip: Vector2<f64>,
        defocus: f64,
    ) -> Array2<u16> {
        let angle = self.body_angle_deg.to_radians();
        let body = Vector2::new(angle.cos(), angle.sin());
        let half_width = (self.tip_half_width_px + self.widening_px_per_um * defocus).max(0.3);
        let softness = self.edge_softness_px + self.blur_px_per_um * defocus.abs();

        Array2::from_shape_fn((height, width), |(row, col)| {
            let v = Vector2::new(col as f64, row as f64) - tip;
            let along = v.dot(&body);
            let signed_distance = if along <= 0.0 {
                v.norm() - half_width
            } else {
                let across = (v.x * body.y - v.y * body.x).abs();
                across - (half_width + self.taper * along)
            };
            let coverage = 1.0 / (1.0 + (signed_distance / softness).exp());
            let rim = 4.0 * coverage * (1.0 - coverage);
            let value = self.background - self.silhouette_depth * coverage
                + self.rim_per_um * defocus * rim;
            value.round().clamp(0.0, u16::MAX as f64) as u16
        })
    }
}

/// Camera rendering the pipette as seen through the simulated microscope
pub struct SimScopeCamera {
    config: CameraConfig,
    optics: OpticsModel,
    arm: SimStage,
    microscope: SimStage,
    clock: Arc<dyn Clock>,
    frame_number: u64,
}

impl SimScopeCamera {
    pub fn new(
        config: CameraConfig,
        optics: OpticsModel,
        arm: SimStage,
        microscope: SimStage,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            optics,
            arm,
            microscope,
            clock,
            frame_number: 0,
        }
    }

    pub fn optics(&self) -> &OpticsModel {
        &self.optics
    }

    fn frame_center(&self) -> Vector2<f64> {
        Vector2::new(
            (self.config.width / 2) as f64,
            (self.config.height / 2) as f64,
        )
    }

    /// Where the tip currently appears, in display orientation
    pub fn tip_pixel(&self) -> (Vector2<f64>, f64) {
        self.optics.tip_view(
            self.frame_center(),
            &self.arm.raw_position(),
            &self.microscope.raw_position(),
        )
    }
}

impl CameraInterface for SimScopeCamera {
    fn capture_frame(&mut self) -> CameraResult<(Array2<u16>, FrameMetadata)> {
        let (tip, defocus) = self.tip_pixel();
        let display = self
            .optics
            .render(self.config.width, self.config.height, tip, defocus);
        // Flips are their own inverse: undo the display orientation so that
        // `capture_oriented` yields the rendered view.
        let raw = self.config.orientation.apply(&display.view());

        self.frame_number += 1;
        let metadata = FrameMetadata {
            frame_number: self.frame_number,
            exposure: self.config.exposure,
            timestamp: Timestamp::from_duration(self.clock.now()),
        };
        Ok((raw, metadata))
    }

    fn get_config(&self) -> &CameraConfig {
        &self.config
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "sim-scope"
    }
}
