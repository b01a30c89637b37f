//! Numerical building blocks: dense matrices, projective transforms and robust statistics.

mod homography;
mod matrix;
pub mod statistics;

pub use homography::Homography;
pub use matrix::Matrix;
pub use statistics::{
    MAD_TO_SIGMA, mad_f32_with_scratch, mad_to_sigma, mean_and_std_dev, mean_f32,
    median_and_mad_f32_mut, median_f32_mut,
};

/// FWHM = 2√(2 ln 2) × σ for a Gaussian.
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045;

#[inline]
pub const fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / SIGMA_TO_FWHM
}

#[inline]
pub const fn sigma_to_fwhm(sigma: f64) -> f64 {
    sigma * SIGMA_TO_FWHM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_width_conversions() {
        // A unit-σ Gaussian is 2√(2 ln 2) wide at half maximum.
        let expected = 2.0 * (2.0 * std::f64::consts::LN_2).sqrt();
        assert!((sigma_to_fwhm(1.0) - expected).abs() < 1e-8);
        assert!((fwhm_to_sigma(expected) - 1.0).abs() < 1e-8);
        assert!(sigma_to_fwhm(2.0) > 2.0);
        assert!(fwhm_to_sigma(3.0) < 3.0);
    }
}
