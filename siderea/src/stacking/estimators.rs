//! Per-frame location/scale statistics and the normalization they drive.

use serde::{Deserialize, Serialize};

use crate::math::{mad_to_sigma, mean_and_std_dev, median_and_mad_f32_mut};

use super::config::{Estimator, Normalization};
use super::error::FrameError;
use super::frame::FrameReader;

/// Location and scale statistics of one channel of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScaleEstimators {
    pub mean: f32,
    /// Sample standard deviation.
    pub std_dev: f32,
    pub median: f32,
    /// Median absolute deviation (unscaled).
    pub mad: f32,
}

impl ScaleEstimators {
    /// Statistics of the finite values in `samples`. Reorders `samples`.
    pub fn from_samples(samples: &mut Vec<f32>) -> Self {
        samples.retain(|v| v.is_finite());
        if samples.is_empty() {
            return Self::default();
        }
        let (mean, std_dev) = mean_and_std_dev(samples);
        let (median, mad) = median_and_mad_f32_mut(samples);
        Self {
            mean,
            std_dev,
            median,
            mad,
        }
    }

    #[inline]
    pub fn location(&self, estimator: Estimator) -> f32 {
        match estimator {
            Estimator::Median => self.median,
            Estimator::Mean => self.mean,
        }
    }

    /// Spread in sigma units: MAD-derived for `Median`, standard deviation for `Mean`.
    #[inline]
    pub fn scale(&self, estimator: Estimator) -> f32 {
        match estimator {
            Estimator::Median => mad_to_sigma(self.mad),
            Estimator::Mean => self.std_dev,
        }
    }

    /// Robust background noise.
    #[inline]
    pub fn noise(&self) -> f32 {
        mad_to_sigma(self.mad)
    }
}

/// Scale estimators of every channel of `frame`.
pub fn compute_scale_estimators(
    frame: &impl FrameReader,
) -> Result<Vec<ScaleEstimators>, FrameError> {
    let dims = frame.dimensions();
    let mut plane = vec![0.0f32; dims.plane_len()];
    (0..dims.channels)
        .map(|channel| -> Result<ScaleEstimators, FrameError> {
            plane.resize(dims.plane_len(), 0.0);
            frame.read_rows(channel, 0..dims.height, &mut plane)?;
            Ok(ScaleEstimators::from_samples(&mut plane))
        })
        .collect()
}

/// Affine sample correction `v · gain + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChannelNorm {
    pub gain: f32,
    pub offset: f32,
}

impl ChannelNorm {
    pub const IDENTITY: ChannelNorm = ChannelNorm {
        gain: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        v * self.gain + self.offset
    }

    /// Correction of a frame with statistics `frame` onto `reference`.
    pub fn between(
        normalization: Normalization,
        estimator: Estimator,
        frame: &ScaleEstimators,
        reference: &ScaleEstimators,
    ) -> Self {
        let m_i = frame.location(estimator);
        let m_ref = reference.location(estimator);
        let ratio = || {
            if m_i.abs() > f32::EPSILON {
                m_ref / m_i
            } else {
                1.0
            }
        };
        let scaling = || {
            let s_i = frame.scale(estimator);
            if s_i > f32::EPSILON {
                reference.scale(estimator) / s_i
            } else {
                1.0
            }
        };

        match normalization {
            Normalization::None => Self::IDENTITY,
            Normalization::Additive => Self {
                gain: 1.0,
                offset: m_ref - m_i,
            },
            Normalization::Multiplicative => Self {
                gain: ratio(),
                offset: 0.0,
            },
            Normalization::AdditiveScaling => {
                let k = scaling();
                Self {
                    gain: k,
                    offset: m_ref - m_i * k,
                }
            }
            Normalization::MultiplicativeScaling => {
                let k = scaling();
                let r = ratio();
                Self {
                    gain: k * r,
                    offset: (m_i - m_i * k) * r,
                }
            }
        }
    }
}

/// One correction per channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameNorm {
    pub channels: Vec<ChannelNorm>,
}

/// Index of the frame with the lowest mean noise across channels.
pub(crate) fn select_reference_frame(stats: &[Vec<ScaleEstimators>]) -> usize {
    assert!(!stats.is_empty());
    let mut best_frame = 0;
    let mut best_noise = f32::MAX;

    for (frame_idx, channels) in stats.iter().enumerate() {
        let noise = channels.iter().map(ScaleEstimators::noise).sum::<f32>()
            / channels.len().max(1) as f32;
        if noise < best_noise {
            best_noise = noise;
            best_frame = frame_idx;
        }
    }

    best_frame
}

/// Per-frame corrections towards frame `reference`. The reference frame
/// itself always gets the identity.
pub(crate) fn compute_frame_norms(
    stats: &[Vec<ScaleEstimators>],
    normalization: Normalization,
    estimator: Estimator,
    reference: usize,
) -> Vec<FrameNorm> {
    let reference_stats = &stats[reference];
    stats
        .iter()
        .enumerate()
        .map(|(frame_idx, channels)| {
            let channels = if frame_idx == reference {
                vec![ChannelNorm::IDENTITY; channels.len()]
            } else {
                channels
                    .iter()
                    .zip(reference_stats)
                    .map(|(frame, target)| {
                        ChannelNorm::between(normalization, estimator, frame, target)
                    })
                    .collect()
            };
            FrameNorm { channels }
        })
        .collect()
}
