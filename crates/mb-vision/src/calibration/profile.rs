//! 1-D signal helpers shared by the calibration passes.

use image::RgbaImage;

pub(crate) fn luma(px: &image::Rgba<u8>) -> f64 {
    (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0
}

/// Mean absolute horizontal brightness change along a row
pub(crate) fn row_edge_energy(frame: &RgbaImage, y: u32) -> f64 {
    let w = frame.width();
    if w < 2 || y >= frame.height() {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut prev = luma(frame.get_pixel(0, y));
    for x in 1..w {
        let cur = luma(frame.get_pixel(x, y));
        sum += (cur - prev).abs();
        prev = cur;
    }
    sum / (w - 1) as f64
}

/// Centred moving average over `window` samples; the window shrinks at
/// both ends instead of padding.
pub(crate) fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    let n = data.len();
    let reach = window / 2;
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &v in data {
        prefix.push(prefix[prefix.len() - 1] + v);
    }
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(reach);
            let stop = n.min(i + reach + 1);
            (prefix[stop] - prefix[start]) / (stop - start) as f64
        })
        .collect()
}

/// Contiguous runs strictly above `threshold`, as half-open ranges.
pub(crate) fn find_segments(profile: &[f64], threshold: f64, min_len: usize) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = None;

    for (i, &val) in profile.iter().enumerate() {
        match start {
            None if val > threshold => start = Some(i),
            Some(s) if val <= threshold => {
                if i - s >= min_len {
                    segments.push((s, i));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if profile.len() - s >= min_len {
            segments.push((s, profile.len()));
        }
    }
    segments
}

/// Most common value where "equal" means within `max(2, 10%)`.
///
/// Returns the rounded mean of the winning cluster and the share of all
/// values that fell inside it. Ties go to the larger value.
pub(crate) fn tolerant_mode(values: &[u32]) -> Option<(u32, f64)> {
    if values.is_empty() {
        return None;
    }
    let tolerance = |v: u32| (v / 10).max(2);

    let mut best: Option<(usize, u32)> = None;
    for &candidate in values {
        let tol = tolerance(candidate);
        let count = values
            .iter()
            .filter(|&&v| v.abs_diff(candidate) <= tol)
            .count();
        let better = match best {
            None => true,
            Some((c, v)) => count > c || (count == c && candidate > v),
        };
        if better {
            best = Some((count, candidate));
        }
    }

    let (count, center) = best?;
    let tol = tolerance(center);
    let members: Vec<u32> = values
        .iter()
        .copied()
        .filter(|v| v.abs_diff(center) <= tol)
        .collect();
    let mean = members.iter().map(|&v| v as f64).sum::<f64>() / members.len() as f64;
    Some((mean.round() as u32, count as f64 / values.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average() {
        let data = vec![0.0, 0.0, 90.0, 90.0, 0.0, 0.0];
        let result = moving_average(&data, 3);
        assert_eq!(result.len(), data.len());
        assert_eq!(result[0], 0.0);
        assert!((result[1] - 30.0).abs() < 1e-9);
        assert!((result[2] - 60.0).abs() < 1e-9);
        // Edges average over the shorter window
        assert_eq!(moving_average(&[4.0, 8.0], 5), vec![6.0, 6.0]);
        assert_eq!(moving_average(&data, 1), data);
        assert!(moving_average(&[], 3).is_empty());
    }

    #[test]
    fn test_find_segments() {
        let profile = vec![
            10.0, 10.0, 10.0, 80.0, 80.0, 80.0, 80.0, 10.0, 10.0, 80.0, 80.0, 80.0,
        ];
        let segments = find_segments(&profile, 50.0, 3);
        assert_eq!(segments, vec![(3, 7), (9, 12)]);
        assert!(find_segments(&profile, 50.0, 5).is_empty());
    }

    #[test]
    fn test_tolerant_mode_ignores_outliers() {
        let (mode, share) = tolerant_mode(&[64, 63, 65, 64, 140, 12]).unwrap();
        assert_eq!(mode, 64);
        assert!((share - 4.0 / 6.0).abs() < 1e-9);
        assert!(tolerant_mode(&[]).is_none());
    }

    #[test]
    fn test_row_energy() {
        let flat = RgbaImage::from_pixel(10, 2, image::Rgba([50, 50, 50, 255]));
        assert_eq!(row_edge_energy(&flat, 0), 0.0);
        let stripes = RgbaImage::from_fn(10, 1, |x, _| {
            let v = if x % 2 == 0 { 0 } else { 90 };
            image::Rgba([v, v, v, 255])
        });
        assert_eq!(row_edge_energy(&stripes, 0), 90.0);
    }
}
