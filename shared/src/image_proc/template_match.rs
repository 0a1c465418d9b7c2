//! Normalized cross-correlation template search.
//!
//! Scores follow the zero-mean normalized correlation coefficient: 1.0 for a
//! perfect (affine-intensity) match, 0.0 for no correlation. Negative
//! correlation is clamped to 0. Window sums come from integral images, so the
//! cost per location is one pass over the template.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use thiserror::Error;

/// Score at or above which a template is considered found
pub const MATCH_THRESHOLD: f64 = 0.75;

/// Pixel coordinate; `x` is the column, `y` the row
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Value along axis 0 (x) or 1 (y)
    pub fn component(&self, axis: usize) -> f64 {
        if axis == 0 {
            self.x
        } else {
            self.y
        }
    }
}

impl Add for PixelPos {
    type Output = PixelPos;

    fn add(self, rhs: PixelPos) -> PixelPos {
        PixelPos::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for PixelPos {
    type Output = PixelPos;

    fn sub(self, rhs: PixelPos) -> PixelPos {
        PixelPos::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Result of searching one template in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// `score >= MATCH_THRESHOLD`
    pub found: bool,
    /// Best correlation score in [0, 1]
    pub score: f64,
    /// Top-left corner of the best-scoring placement
    pub location: PixelPos,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateMatchError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Summed-area table with one row and column of zero padding
struct Integral {
    sum: Array2<f64>,
    sum_sq: Array2<f64>,
}

impl Integral {
    fn new(image: &ArrayView2<u16>) -> Self {
        let (rows, cols) = image.dim();
        let mut sum = Array2::<f64>::zeros((rows + 1, cols + 1));
        let mut sum_sq = Array2::<f64>::zeros((rows + 1, cols + 1));

        for r in 0..rows {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for c in 0..cols {
                let v = image[[r, c]] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[[r + 1, c + 1]] = sum[[r, c + 1]] + row_sum;
                sum_sq[[r + 1, c + 1]] = sum_sq[[r, c + 1]] + row_sq;
            }
        }

        Self { sum, sum_sq }
    }

    fn window(&self, table: &Array2<f64>, r: usize, c: usize, h: usize, w: usize) -> f64 {
        table[[r + h, c + w]] - table[[r, c + w]] - table[[r + h, c]] + table[[r, c]]
    }

    /// Sum and sum of squares over the `h`x`w` window at (r, c)
    fn stats(&self, r: usize, c: usize, h: usize, w: usize) -> (f64, f64) {
        (
            self.window(&self.sum, r, c, h, w),
            self.window(&self.sum_sq, r, c, h, w),
        )
    }
}

/// Locate `template` in `frame`.
///
/// Poor matches are not errors: the best placement is always returned and
/// `found` reports whether it clears [`MATCH_THRESHOLD`]. Flat regions (zero
/// variance in either image) score 0.
///
/// # Errors
/// `InvalidImage` if either image is empty or the template does not fit
/// inside the frame.
pub fn match_template(
    frame: &ArrayView2<u16>,
    template: &ArrayView2<u16>,
) -> Result<TemplateMatch, TemplateMatchError> {
    let (frame_h, frame_w) = frame.dim();
    let (tmpl_h, tmpl_w) = template.dim();

    if frame_h == 0 || frame_w == 0 {
        return Err(TemplateMatchError::InvalidImage(
            "frame has zero size".to_string(),
        ));
    }
    if tmpl_h == 0 || tmpl_w == 0 {
        return Err(TemplateMatchError::InvalidImage(
            "template has zero size".to_string(),
        ));
    }
    if tmpl_h > frame_h || tmpl_w > frame_w {
        return Err(TemplateMatchError::InvalidImage(format!(
            "template {tmpl_w}x{tmpl_h} larger than frame {frame_w}x{frame_h}"
        )));
    }

    let n = (tmpl_h * tmpl_w) as f64;
    let tmpl_mean = template.iter().map(|&v| v as f64).sum::<f64>() / n;
    let centered: Vec<f64> = template.iter().map(|&v| v as f64 - tmpl_mean).collect();
    let tmpl_var: f64 = centered.iter().map(|v| v * v).sum();

    let mut best = TemplateMatch {
        found: false,
        score: 0.0,
        location: PixelPos::default(),
    };

    if tmpl_var <= f64::EPSILON {
        return Ok(best);
    }

    let integral = Integral::new(frame);
    let mut best_raw = f64::NEG_INFINITY;

    for r in 0..=(frame_h - tmpl_h) {
        for c in 0..=(frame_w - tmpl_w) {
            let (sum, sum_sq) = integral.stats(r, c, tmpl_h, tmpl_w);
            let frame_var = sum_sq - sum * sum / n;
            if frame_var <= f64::EPSILON * sum_sq.max(1.0) {
                continue;
            }

            // Sum of centered template times raw frame equals the product
            // with the centered frame, since the centered template sums to 0.
            let mut cross = 0.0;
            let mut k = 0;
            for i in 0..tmpl_h {
                for j in 0..tmpl_w {
                    cross += centered[k] * frame[[r + i, c + j]] as f64;
                    k += 1;
                }
            }

            let score = cross / (tmpl_var * frame_var).sqrt();
            if score > best_raw {
                best_raw = score;
                best.location = PixelPos::new(c as f64, r as f64);
            }
        }
    }

    best.score = best_raw.clamp(0.0, 1.0);
    best.found = best.score >= MATCH_THRESHOLD;
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn noise_frame(rows: usize, cols: usize, seed: u64) -> Array2<u16> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0..4096))
    }

    #[test]
    fn test_template_cut_from_frame_is_found() {
        let frame = noise_frame(48, 64, 1);
        let template = frame.slice(s![10..22, 30..45]).to_owned();

        let result = match_template(&frame.view(), &template.view()).unwrap();

        assert!(result.found);
        assert!(result.score >= 0.99);
        assert_eq!(result.location, PixelPos::new(30.0, 10.0));
    }

    #[test]
    fn test_brightness_change_still_matches() {
        let frame = noise_frame(40, 40, 2);
        let template = frame.slice(s![5..15, 20..30]).mapv(|v| v / 2 + 100);

        let result = match_template(&frame.view(), &template.view()).unwrap();

        assert!(result.found);
        assert_eq!(result.location, PixelPos::new(20.0, 5.0));
    }

    #[test]
    fn test_unrelated_template_not_found() {
        let frame = noise_frame(40, 40, 3);
        let template = noise_frame(10, 10, 4);

        let result = match_template(&frame.view(), &template.view()).unwrap();

        assert!(!result.found);
        assert!(result.score < MATCH_THRESHOLD);
        assert!((0.0..=1.0).contains(&result.score));
    }

    #[test]
    fn test_flat_frame_scores_zero() {
        let frame = Array2::from_elem((20, 20), 500u16);
        let template = noise_frame(5, 5, 5);

        let result = match_template(&frame.view(), &template.view()).unwrap();

        assert!(!result.found);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_flat_template_scores_zero() {
        let frame = noise_frame(20, 20, 6);
        let template = Array2::from_elem((5, 5), 9u16);

        let result = match_template(&frame.view(), &template.view()).unwrap();
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_inverted_template_clamps_to_zero() {
        let frame = noise_frame(16, 16, 7);
        let template = frame.mapv(|v| 4095 - v);

        let result = match_template(&frame.view(), &template.view()).unwrap();
        assert_eq!(result.score, 0.0);
        assert!(!result.found);
    }

    #[test]
    fn test_template_larger_than_frame_is_invalid() {
        let frame = noise_frame(8, 8, 8);
        let template = noise_frame(9, 4, 9);

        let err = match_template(&frame.view(), &template.view()).unwrap_err();
        assert!(matches!(err, TemplateMatchError::InvalidImage(_)));
    }

    #[test]
    fn test_empty_images_are_invalid() {
        let empty = Array2::<u16>::zeros((0, 5));
        let frame = noise_frame(8, 8, 10);

        assert!(match_template(&empty.view(), &frame.view()).is_err());
        assert!(match_template(&frame.view(), &empty.view()).is_err());
    }
}
