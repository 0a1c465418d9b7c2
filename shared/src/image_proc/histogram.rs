//! Intensity histograms over a view's own value range.

use ndarray::ArrayView2;

/// Count pixels in `bins` equal-width bins spanning `[min, max]` of the view.
///
/// The last bin is closed on the right. A constant view puts every pixel in
/// the middle bin. An empty view returns all zeros.
pub fn histogram(view: &ArrayView2<u16>, bins: usize) -> Vec<usize> {
    let mut counts = vec![0usize; bins];
    if bins == 0 || view.is_empty() {
        return counts;
    }

    let (min, max) = view
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if min == max {
        counts[bins / 2] = view.len();
        return counts;
    }

    let lo = min as f64;
    let width = (max as f64 - lo) / bins as f64;
    for &v in view.iter() {
        let bin = ((v as f64 - lo) / width) as usize;
        counts[bin.min(bins - 1)] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_two_level_image() {
        let img = array![[0u16, 0, 100], [100, 100, 100]];
        let counts = histogram(&img.view(), 10);

        assert_eq!(counts[0], 2);
        assert_eq!(counts[9], 4);
        assert_eq!(counts.iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_constant_image_uses_middle_bin() {
        let img = Array2::from_elem((3, 3), 42u16);
        let counts = histogram(&img.view(), 10);

        assert_eq!(counts[5], 9);
        assert_eq!(*counts.iter().min().unwrap(), 0);
    }

    #[test]
    fn test_ramp_fills_every_bin() {
        let img = Array2::from_shape_fn((1, 100), |(_, c)| c as u16);
        let counts = histogram(&img.view(), 10);

        assert!(counts.iter().all(|&c| c == 10));
    }
}
