//! Stacking configuration.
//!
//! A `StackConfig` picks one policy per stage of the per-pixel pipeline:
//! interpolation → normalization → rejection → integration.

use serde::{Deserialize, Serialize};

/// Combines the surviving samples of a pixel stack into one value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Integration {
    #[default]
    Average,
    Median,
    Min,
    Max,
}

/// Outlier rejection applied to each pixel stack before integration.
///
/// Sigma bounds are `[mean − low·σ, mean + high·σ]` with the sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    #[default]
    None,
    /// Iteratively drops samples outside the sigma bounds.
    SigmaClip {
        low: f32,
        high: f32,
        max_iterations: u32,
    },
    /// Iteratively clamps samples to the sigma bounds; nothing is dropped.
    WinsorizedSigmaClip {
        low: f32,
        high: f32,
        max_iterations: u32,
    },
    /// Keeps samples whose rank lies between the `low` and `high` fractions of
    /// the sorted stack, e.g. `0.2..0.8`.
    PercentileClip { low: f32, high: f32 },
}

impl Rejection {
    pub fn sigma_clip(sigma: f32) -> Self {
        Self::SigmaClip {
            low: sigma,
            high: sigma,
            max_iterations: 5,
        }
    }

    pub fn sigma_clip_asymmetric(low: f32, high: f32) -> Self {
        Self::SigmaClip {
            low,
            high,
            max_iterations: 5,
        }
    }

    pub fn winsorized(sigma: f32) -> Self {
        Self::WinsorizedSigmaClip {
            low: sigma,
            high: sigma,
            max_iterations: 5,
        }
    }

    pub fn percentile(low: f32, high: f32) -> Self {
        Self::PercentileClip { low, high }
    }
}

/// Per-frame affine correction that brings each frame's background level
/// (and optionally its spread) onto the reference frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// `v − m_i + m_ref`
    Additive,
    /// `v · m_ref / m_i`
    Multiplicative,
    /// `(v − m_i) · s_ref / s_i + m_ref`
    AdditiveScaling,
    /// `((v − m_i) · s_ref / s_i + m_i) · m_ref / m_i`
    MultiplicativeScaling,
}

/// Location and scale estimators used by normalization.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Estimator {
    /// Median and MAD-derived sigma; insensitive to stars.
    #[default]
    Median,
    /// Mean and standard deviation.
    Mean,
}

/// How a frame is sampled at a non-integer source position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Bilinear,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub integration: Integration,
    pub rejection: Rejection,
    pub normalization: Normalization,
    pub estimator: Estimator,
    pub interpolation: Interpolation,
    /// Frame whose statistics normalization targets. `None` picks the lowest-noise frame.
    pub reference_frame: Option<usize>,
    /// Produce one 8-bit mask per frame marking rejected samples.
    pub weight_maps: bool,
    /// Frames opened and measured concurrently.
    pub max_open_frames: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            integration: Integration::Average,
            rejection: Rejection::None,
            normalization: Normalization::None,
            estimator: Estimator::Median,
            interpolation: Interpolation::Bilinear,
            reference_frame: None,
            weight_maps: false,
            max_open_frames: 8,
        }
    }
}

impl StackConfig {
    // ========== Presets ==========

    /// Plain average, no rejection or normalization.
    pub fn average() -> Self {
        Self::default()
    }

    pub fn median() -> Self {
        Self {
            integration: Integration::Median,
            ..Default::default()
        }
    }

    /// Sigma-clipped average of additively normalized light frames.
    pub fn sigma_clipped(sigma: f32) -> Self {
        Self {
            rejection: Rejection::sigma_clip(sigma),
            normalization: Normalization::Additive,
            ..Default::default()
        }
    }

    /// Winsorized sigma clipping, steadier than plain clipping for small stacks.
    pub fn winsorized(sigma: f32) -> Self {
        Self {
            rejection: Rejection::winsorized(sigma),
            normalization: Normalization::Additive,
            ..Default::default()
        }
    }

    pub fn percentile(low: f32, high: f32) -> Self {
        Self {
            rejection: Rejection::percentile(low, high),
            ..Default::default()
        }
    }

    // ========== Builders ==========

    pub fn with_rejection(mut self, rejection: Rejection) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_reference_frame(mut self, index: usize) -> Self {
        self.reference_frame = Some(index);
        self
    }

    pub fn with_weight_maps(mut self) -> Self {
        self.weight_maps = true;
        self
    }

    // ========== Validation ==========

    /// # Panics
    ///
    /// Panics on non-positive sigmas, zero iterations or an inverted percentile band.
    pub fn validate(&self) {
        match self.rejection {
            Rejection::None => {}
            Rejection::SigmaClip {
                low,
                high,
                max_iterations,
            }
            | Rejection::WinsorizedSigmaClip {
                low,
                high,
                max_iterations,
            } => {
                assert!(low > 0.0, "Sigma low must be positive");
                assert!(high > 0.0, "Sigma high must be positive");
                assert!(max_iterations > 0, "Iterations must be at least 1");
            }
            Rejection::PercentileClip { low, high } => {
                assert!(
                    (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high),
                    "Percentile ranks must be between 0.0 and 1.0"
                );
                assert!(low < high, "Percentile band is inverted: {low} >= {high}");
            }
        }
        assert!(self.max_open_frames > 0, "max_open_frames must be > 0");
    }
}
