//! Template series of the pipette tip at consecutive focal heights.
//!
//! Templates are cut from a small zone around the frame centre, where the
//! tip sits during calibration. Within that zone a half-size peripheral
//! window is chosen so the template holds mostly pipette silhouette; the
//! offset from the window's corner to the zone centre is the tip offset, so
//! `match.location + tip_offset` is the tip pixel.

use crate::config::CalibrationConfig;
use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use hardware::Axis;
use ndarray::{s, Array2, ArrayView2};
use shared::image_proc::{histogram, PixelPos};

/// Bins used to score candidate template windows
const WINDOW_BINS: usize = 10;

/// Pixel rectangle; `row`/`col` is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub row: usize,
    pub col: usize,
    pub height: usize,
    pub width: usize,
}

impl Rect {
    pub fn view<'a>(&self, image: ArrayView2<'a, u16>) -> ArrayView2<'a, u16> {
        image.slice_move(s![
            self.row..self.row + self.height,
            self.col..self.col + self.width
        ])
    }
}

/// Zone of ±`fraction` of each dimension around the frame centre
pub fn template_zone(frame_dim: (usize, usize), fraction: f64) -> PatchResult<Rect> {
    let (height, width) = frame_dim;
    let half_h = (height as f64 * fraction).floor() as usize;
    let half_w = (width as f64 * fraction).floor() as usize;
    if half_h < 2 || half_w < 2 || half_h > height / 2 || half_w > width / 2 {
        return Err(PatchError::InvalidImage(format!(
            "template zone fraction {fraction} unusable for {width}x{height} frames"
        )));
    }
    Ok(Rect {
        row: height / 2 - half_h,
        col: width / 2 - half_w,
        height: 2 * half_h,
        width: 2 * half_w,
    })
}

/// Chosen template window inside the zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TipWindow {
    /// Window relative to the zone
    pub rect: Rect,
    /// Zone centre relative to the window's corner
    pub tip_offset: PixelPos,
}

/// Pick the peripheral half-size window whose sparsest histogram bin is the
/// fullest, i.e. the one with the most even spread of pipette and background.
///
/// Windows sit on a 3x3 grid with quarter-size strides; the centre window
/// is never used. Ties keep the first window in row-major order.
pub fn select_tip_window(zone: &ArrayView2<u16>) -> TipWindow {
    let (zone_h, zone_w) = zone.dim();
    let (win_h, win_w) = (zone_h / 2, zone_w / 2);

    let window_at = |i: usize, j: usize| Rect {
        row: i * zone_h / 4,
        col: j * zone_w / 4,
        height: win_h,
        width: win_w,
    };

    let mut rect = window_at(0, 0);
    let mut best_weight: Option<usize> = None;
    for i in 0..3 {
        for j in 0..3 {
            if i == 1 && j == 1 {
                continue;
            }
            let candidate = window_at(i, j);
            let weight = histogram(&candidate.view(zone.view()), WINDOW_BINS)
                .into_iter()
                .min()
                .unwrap_or(0);
            if best_weight.map_or(true, |w| weight > w) {
                best_weight = Some(weight);
                rect = candidate;
            }
        }
    }

    TipWindow {
        rect,
        tip_offset: PixelPos::new(
            (zone_w / 2) as f64 - rect.col as f64,
            (zone_h / 2) as f64 - rect.row as f64,
        ),
    }
}

/// Odd-length series of tip templates, one per µm of height.
///
/// Template `k` was captured `k - center_index()` µm above the focus.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSeries {
    templates: Vec<Array2<u16>>,
    tip_offset: PixelPos,
}

impl TemplateSeries {
    pub fn new(templates: Vec<Array2<u16>>, tip_offset: PixelPos) -> PatchResult<Self> {
        if templates.len() % 2 == 0 {
            return Err(PatchError::InvalidImage(format!(
                "template series needs an odd length, got {}",
                templates.len()
            )));
        }
        Ok(Self {
            templates,
            tip_offset,
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn center_index(&self) -> usize {
        self.templates.len() / 2
    }

    pub fn center(&self) -> &Array2<u16> {
        &self.templates[self.center_index()]
    }

    pub fn get(&self, index: usize) -> Option<&Array2<u16>> {
        self.templates.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Array2<u16>> {
        self.templates.iter()
    }

    pub fn tip_offset(&self) -> PixelPos {
        self.tip_offset
    }
}

/// Capture a template series around the current focus.
///
/// The microscope is stepped 1 µm per template from below to above the
/// current height and then returned to it.
pub fn capture_series(rig: &mut Rig, config: &CalibrationConfig) -> PatchResult<TemplateSeries> {
    if config.template_count % 2 == 0 {
        return Err(PatchError::InvalidImage(format!(
            "template count must be odd, got {}",
            config.template_count
        )));
    }

    let frame = rig.frame()?;
    let zone = template_zone(frame.dim(), config.template_zone_fraction)?;
    let window = select_tip_window(&zone.view(frame.view()));
    let cut = Rect {
        row: zone.row + window.rect.row,
        col: zone.col + window.rect.col,
        ..window.rect
    };

    let z0 = rig.microscope.position(Axis::Z)?;
    let center = (config.template_count / 2) as f64;
    let mut templates = Vec::with_capacity(config.template_count);
    for k in 0..config.template_count {
        rig.check_running()?;
        rig.microscope
            .absolute_move(z0 + k as f64 - center, Axis::Z)?;
        rig.microscope.wait_until_settled(Axis::Z)?;
        rig.pause(config.settle());
        let frame = rig.frame()?;
        templates.push(cut.view(frame.view()).to_owned());
    }
    rig.microscope.absolute_move(z0, Axis::Z)?;
    rig.microscope.wait_until_settled(Axis::Z)?;

    rig.report(format!(
        "Captured {} templates of {}x{} px, tip offset ({:.0}, {:.0})",
        templates.len(),
        cut.width,
        cut.height,
        window.tip_offset.x,
        window.tip_offset.y
    ));
    TemplateSeries::new(templates, window.tip_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::test_support::sim_rig;
    use hardware::sim::SimRigConfig;
    use shared::image_proc::match_template;

    #[test]
    fn test_template_zone() {
        let zone = template_zone((128, 256), 0.09375).unwrap();
        assert_eq!(
            zone,
            Rect {
                row: 52,
                col: 104,
                height: 24,
                width: 48
            }
        );
        assert!(template_zone((8, 8), 0.1).is_err());
    }

    #[test]
    fn test_window_prefers_structure_over_flat_background() {
        // Dark diagonal band in the lower-right quadrant only
        let zone = Array2::from_shape_fn((24, 24), |(r, c)| {
            if r >= 12 && c >= 12 {
                (1000 + 100 * ((r + c) % 10)) as u16
            } else {
                2000
            }
        });
        let window = select_tip_window(&zone.view());

        assert_eq!(window.rect.row, 12);
        assert_eq!(window.rect.col, 12);
        assert_eq!(window.tip_offset, PixelPos::new(0.0, 0.0));
    }

    #[test]
    fn test_flat_zone_keeps_first_window() {
        let zone = Array2::from_elem((24, 24), 500u16);
        let window = select_tip_window(&zone.view());

        assert_eq!((window.rect.row, window.rect.col), (0, 0));
        assert_eq!(window.tip_offset, PixelPos::new(12.0, 12.0));
    }

    #[test]
    fn test_even_series_rejected() {
        let t = Array2::zeros((4, 4));
        assert!(TemplateSeries::new(vec![t.clone(), t], PixelPos::default()).is_err());
    }

    #[test]
    fn test_capture_series_locates_tip() {
        let (sim, mut rig, _) = sim_rig(SimRigConfig::default());
        let config = CalibrationConfig {
            template_count: 5,
            ..CalibrationConfig::default()
        };

        let series = capture_series(&mut rig, &config).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.center_index(), 2);
        assert_eq!(sim.microscope.raw_position().z, 0.0);

        // The centre template sits where the tip is
        let frame = rig.frame().unwrap();
        let m = match_template(&frame.view(), &series.center().view()).unwrap();
        assert!(m.found);
        let tip = m.location + series.tip_offset();
        assert_eq!(tip, PixelPos::new(64.0, 64.0));
    }
}
