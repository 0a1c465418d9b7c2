//! Height-discriminating autofocus against a template series.

use crate::error::{PatchError, PatchResult};
use crate::rig::Rig;
use crate::templates::TemplateSeries;
use hardware::Axis;
use log::debug;
use shared::image_proc::{match_template, PixelPos};

/// Outcome of one focus step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusResult {
    /// Score of the best template
    pub score: f64,
    /// Microscope Z correction applied, µm
    pub height_offset: f64,
    /// Top-left of the best template placement in the frame
    pub location: PixelPos,
    /// Index of the best template in the series
    pub index: usize,
}

/// Match the latest frame against every template and refocus on the best.
///
/// Templates below the match threshold count as score 0. If none clears
/// it the microscope is not moved and [`PatchError::FocusFailed`] is
/// returned.
pub fn focus(rig: &mut Rig, series: &TemplateSeries) -> PatchResult<FocusResult> {
    let frame = rig.frame()?;

    let mut best: Option<(usize, f64, PixelPos)> = None;
    let mut best_raw = 0.0_f64;
    for (index, template) in series.iter().enumerate() {
        let m = match_template(&frame.view(), &template.view())?;
        best_raw = best_raw.max(m.score);
        let score = if m.found { m.score } else { 0.0 };
        if best.map_or(true, |(_, s, _)| score > s) {
            best = Some((index, score, m.location));
        }
    }

    let (index, score, location) = match best {
        Some(b) if b.1 > 0.0 => b,
        _ => {
            return Err(PatchError::FocusFailed {
                best_score: best_raw,
            })
        }
    };

    let height_offset = series.center_index() as f64 - index as f64;
    let z = rig.microscope.position(Axis::Z)?;
    rig.microscope.absolute_move(z + height_offset, Axis::Z)?;
    rig.microscope.wait_until_settled(Axis::Z)?;

    debug!(
        "focus: template {index} score {score:.3}, moved {height_offset:+.0} µm, tip corner ({:.0}, {:.0})",
        location.x, location.y
    );
    Ok(FocusResult {
        score,
        height_offset,
        location,
        index,
    })
}
