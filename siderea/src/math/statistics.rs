//! Location and scale statistics over f32 samples.

/// σ ≈ 1.4826 × MAD for a normal distribution (1 / Φ⁻¹(3/4)).
pub const MAD_TO_SIGMA: f32 = 1.4826022;

#[inline]
pub fn mad_to_sigma(mad: f32) -> f32 {
    mad * MAD_TO_SIGMA
}

/// Arithmetic mean, accumulated in f64. Zero for an empty slice.
pub fn mean_f32(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
}

/// Mean and sample standard deviation (n - 1 denominator).
/// The deviation is zero for fewer than two values.
pub fn mean_and_std_dev(values: &[f32]) -> (f32, f32) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    if n < 2 {
        return (mean as f32, 0.0);
    }
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1) as f64;
    (mean as f32, var.sqrt() as f32)
}

/// Median by quickselect. Reorders `data`; even lengths average the two middle values.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;
    let (left, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *median;
    if len % 2 == 1 {
        return upper;
    }
    let lower = left.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (lower + upper) * 0.5
}

/// MAD = median(|x - median|), computed in `scratch`.
pub fn mad_f32_with_scratch(values: &[f32], median: f32, scratch: &mut Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    scratch.clear();
    scratch.extend(values.iter().map(|&v| (v - median).abs()));
    median_f32_mut(scratch)
}

/// Median and MAD together. Overwrites `data` with absolute deviations.
pub fn median_and_mad_f32_mut(data: &mut [f32]) -> (f32, f32) {
    debug_assert!(!data.is_empty());

    let median = median_f32_mut(data);
    for v in data.iter_mut() {
        *v = (*v - median).abs();
    }
    (median, median_f32_mut(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean_f32(&[]), 0.0);
        assert!((mean_f32(&[1.0, 2.0, 3.0, 6.0]) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_std_dev() {
        let (mean, sd) = mean_and_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-6);
        // Population σ is 2; sample σ is sqrt(32 / 7).
        assert!((sd - (32.0f32 / 7.0).sqrt()).abs() < 1e-5);
        assert_eq!(mean_and_std_dev(&[3.0]), (3.0, 0.0));
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_f32_mut(&mut [5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median_f32_mut(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median_f32_mut(&mut [7.0]), 7.0);
    }

    #[test]
    fn test_mad_ignores_single_outlier() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        let mut scratch = Vec::new();
        assert_eq!(mad_f32_with_scratch(&values, 3.0, &mut scratch), 1.0);

        let mut data = values;
        assert_eq!(median_and_mad_f32_mut(&mut data), (3.0, 1.0));
    }

    #[test]
    fn test_mad_to_sigma() {
        assert!((mad_to_sigma(1.0) - 1.4826).abs() < 1e-4);
    }
}
