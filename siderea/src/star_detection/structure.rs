//! Structure maps: images that emphasise point-like structure at the stellar scale.

use common::Buffer2;
use common::parallel::rows_per_chunk;
use rayon::prelude::*;

use super::config::DetectionConfig;
use crate::math::{mad_to_sigma, median_f32_mut};

/// Upper bound on samples used for the noise estimate.
const NOISE_SAMPLE_LIMIT: usize = 1 << 18;

/// Produces a structure map from a luminance plane. Point sources become
/// positive peaks on a zero-mean background.
pub trait StructureMap: Send + Sync {
    fn compute(&self, luminance: &Buffer2<f32>) -> Buffer2<f32>;
}

/// Band-pass structure map: the image smoothed at the star scale minus the image
/// smoothed at `K` times that scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceOfGaussians {
    pub star_sigma: f64,
    pub background_sigma: f64,
}

impl DifferenceOfGaussians {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            star_sigma: config.star_sigma(),
            background_sigma: config.background_sigma(),
        }
    }
}

impl StructureMap for DifferenceOfGaussians {
    fn compute(&self, luminance: &Buffer2<f32>) -> Buffer2<f32> {
        let mut fine = gaussian_blur(luminance, self.star_sigma);
        let coarse = gaussian_blur(luminance, self.background_sigma);
        fine.par_iter_mut()
            .zip(coarse.par_iter())
            .for_each(|(f, &c)| *f -= c);
        fine
    }
}

/// Normalized 1-D Gaussian kernel of radius `ceil(3σ)`.
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Separable Gaussian blur with edge clamping, parallel over row bands.
pub(crate) fn gaussian_blur(input: &Buffer2<f32>, sigma: f64) -> Buffer2<f32> {
    let width = input.width();
    let height = input.height();
    if width == 0 || height == 0 || sigma <= 0.0 {
        return input.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let rows = rows_per_chunk(height);

    let mut horizontal = vec![0.0f32; width * height];
    horizontal
        .par_chunks_mut(width * rows)
        .enumerate()
        .for_each(|(band, out)| {
            for (r, out_row) in out.chunks_mut(width).enumerate() {
                let src = input.row(band * rows + r);
                for (x, value) in out_row.iter_mut().enumerate() {
                    *value = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, w)| {
                            let sx = (x as isize + k as isize - radius).clamp(0, width as isize - 1);
                            w * src[sx as usize]
                        })
                        .sum();
                }
            }
        });

    let mut vertical = vec![0.0f32; width * height];
    vertical
        .par_chunks_mut(width * rows)
        .enumerate()
        .for_each(|(band, out)| {
            for (r, out_row) in out.chunks_mut(width).enumerate() {
                let y = (band * rows + r) as isize;
                for (k, w) in kernel.iter().enumerate() {
                    let sy = (y + k as isize - radius).clamp(0, height as isize - 1) as usize;
                    let src = &horizontal[sy * width..(sy + 1) * width];
                    for (value, s) in out_row.iter_mut().zip(src) {
                        *value += w * s;
                    }
                }
            }
        });

    Buffer2::new(width, height, vertical)
}

/// MAD-based noise of a structure map, on a strided subsample for large maps.
pub(crate) fn estimate_noise(map: &Buffer2<f32>) -> f32 {
    if map.is_empty() {
        return 0.0;
    }
    let stride = map.len().div_ceil(NOISE_SAMPLE_LIMIT);
    let mut samples: Vec<f32> = map.iter().step_by(stride).copied().collect();
    let median = median_f32_mut(&mut samples);
    for v in samples.iter_mut() {
        *v = (*v - median).abs();
    }
    mad_to_sigma(median_f32_mut(&mut samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.3);
        assert_eq!(kernel.len(), 2 * 4 + 1);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        for i in 0..kernel.len() / 2 {
            assert_eq!(kernel[i], kernel[kernel.len() - 1 - i]);
        }
    }

    #[test]
    fn test_blur_preserves_flat_image() {
        let flat = Buffer2::new_filled(17, 9, 0.25f32);
        let blurred = gaussian_blur(&flat, 2.0);
        assert!(blurred.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_blur_conserves_interior_impulse() {
        let mut impulse = Buffer2::new_default(31, 31);
        impulse[(15, 15)] = 1.0f32;
        let blurred = gaussian_blur(&impulse, 1.5);
        assert!((blurred.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(blurred[(15, 15)] > blurred[(16, 15)]);
        assert!((blurred[(14, 15)] - blurred[(16, 15)]).abs() < 1e-7);
    }

    #[test]
    fn test_dog_peaks_on_point_source_and_vanishes_on_flat() {
        let mut image = Buffer2::new_filled(41, 41, 0.1f32);
        image[(20, 20)] = 1.0;
        let dog = DifferenceOfGaussians {
            star_sigma: 1.0,
            background_sigma: 3.0,
        };
        let map = dog.compute(&image);
        let (max_idx, _) = map
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(max_idx, 20 * 41 + 20);
        assert!(map[(2, 2)].abs() < 1e-6);
    }

    #[test]
    fn test_noise_of_constant_map_is_zero() {
        assert_eq!(estimate_noise(&Buffer2::new_filled(8, 8, 3.0)), 0.0);
    }
}
