//! Star detection configuration.

use serde::{Deserialize, Serialize};

/// Fraction of FWHM that gives the Gaussian sigma (1 / 2.3548).
pub const FWHM_SIGMA_FACTOR: f64 = 0.42466;

/// Parametric profile fitted to each candidate.
#[derive(
    Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, strum_macros::Display,
)]
pub enum PsfModel {
    /// `A·exp(-Q/2) + B` with an elliptical quadratic form `Q`.
    #[default]
    Gaussian,
    /// `A·(1 + Q)^-β + B`; wider wings than a Gaussian for seeing-limited stars.
    Moffat { beta: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Expected stellar FWHM in pixels; sets the structure-map scales.
    pub fwhm: f64,
    /// Background scale of the structure map as a multiple of the star scale.
    pub structure_k: f64,
    /// Detection threshold in units of structure-map noise.
    pub detection_sigma: f32,
    pub psf_model: PsfModel,
    /// Half-size of the square fit window. Candidates whose window leaves the image are skipped.
    pub fit_radius: usize,
    /// Minimum `min(fwhm) / max(fwhm)`; rejects trails and hot-pixel pairs.
    pub min_roundness: f64,
    /// Keep only the brightest `max_stars` stars.
    pub max_stars: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fwhm: 3.0,
            structure_k: 3.0,
            detection_sigma: 5.0,
            psf_model: PsfModel::Gaussian,
            fit_radius: 6,
            min_roundness: 0.5,
            max_stars: None,
        }
    }
}

impl DetectionConfig {
    /// Defaults scaled to an expected FWHM: the fit window spans two FWHM each side.
    pub fn for_fwhm(fwhm: f64) -> Self {
        Self {
            fwhm,
            fit_radius: ((2.0 * fwhm).ceil() as usize).max(3),
            ..Default::default()
        }
    }

    /// Moffat fits with β = 2.5, typical for ground-based seeing.
    pub fn moffat() -> Self {
        Self {
            psf_model: PsfModel::Moffat { beta: 2.5 },
            ..Default::default()
        }
    }

    pub fn with_psf_model(mut self, psf_model: PsfModel) -> Self {
        self.psf_model = psf_model;
        self
    }

    pub fn with_max_stars(mut self, max_stars: usize) -> Self {
        self.max_stars = Some(max_stars);
        self
    }

    pub fn with_min_roundness(mut self, min_roundness: f64) -> Self {
        self.min_roundness = min_roundness;
        self
    }

    pub fn with_detection_sigma(mut self, detection_sigma: f32) -> Self {
        self.detection_sigma = detection_sigma;
        self
    }

    /// Sigma of the star-scale smoothing.
    pub fn star_sigma(&self) -> f64 {
        FWHM_SIGMA_FACTOR * self.fwhm
    }

    /// Sigma of the background-scale smoothing.
    pub fn background_sigma(&self) -> f64 {
        FWHM_SIGMA_FACTOR * self.structure_k * self.fwhm
    }

    pub fn validate(&self) {
        assert!(self.fwhm > 0.0, "fwhm must be positive");
        assert!(self.structure_k > 1.0, "structure_k must be greater than 1");
        assert!(self.detection_sigma > 0.0, "detection_sigma must be positive");
        assert!(self.fit_radius >= 2, "fit_radius must be at least 2");
        assert!(
            (0.0..=1.0).contains(&self.min_roundness),
            "min_roundness must be between 0.0 and 1.0"
        );
        if let PsfModel::Moffat { beta } = self.psf_model {
            assert!(beta > 1.0, "Moffat beta must be greater than 1");
        }
        if let Some(max) = self.max_stars {
            assert!(max > 0, "max_stars must be at least 1");
        }
    }
}
