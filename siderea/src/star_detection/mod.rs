//! DAOFIND-style star detection.
//!
//! Pipeline: luminance plane → structure map → noise threshold → connected
//! peaks → per-candidate PSF fit (parallel) → roundness filter → brightness sort.

mod candidates;
mod config;
mod psf;
mod structure;


use glam::DVec2;
use rayon::prelude::*;

use crate::image::{Image, Sample};
use crate::progress::{
    Cancellation, Cancelled, ProgressObserver, ProgressTracker, SilentObserver, Stage,
};

pub use candidates::Candidate;
pub use config::{DetectionConfig, FWHM_SIGMA_FACTOR, PsfModel};
pub use psf::{FitFailure, MeanPsf, Psf, PsfAccumulator, fit_psf};
pub use structure::{DifferenceOfGaussians, StructureMap};

/// Candidates fitted between cancellation checks and progress updates.
const FIT_BATCH: usize = 64;

/// A detected star. Never modified after detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    /// Half width at half maximum along the PSF major axis.
    pub radius_x: f64,
    /// Half width at half maximum along the PSF minor axis.
    pub radius_y: f64,
    /// Integrated flux above background.
    pub luminance: f64,
}

impl Star {
    #[inline]
    pub fn pos(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    fn from_psf(psf: &Psf) -> Self {
        Self {
            x: psf.x,
            y: psf.y,
            radius_x: 0.5 * psf.fwhm_x,
            radius_y: 0.5 * psf.fwhm_y,
            luminance: psf.flux,
        }
    }
}

/// Luminance-ordered star list.
pub type StarVector = Vec<Star>;

/// Sorts brightest first.
pub fn sort_by_luminance(stars: &mut [Star]) {
    stars.sort_by(|a, b| b.luminance.total_cmp(&a.luminance));
}

/// Counts of candidates dropped at each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub border: usize,
    pub too_few_pixels: usize,
    pub singular: usize,
    pub diverged: usize,
    pub out_of_bounds: usize,
    pub elongated: usize,
}

impl RejectionCounts {
    fn record(&mut self, failure: FitFailure) {
        match failure {
            FitFailure::Border => self.border += 1,
            FitFailure::TooFewPixels => self.too_few_pixels += 1,
            FitFailure::Singular => self.singular += 1,
            FitFailure::Diverged => self.diverged += 1,
            FitFailure::OutOfBounds => self.out_of_bounds += 1,
        }
    }

    fn merge(mut self, other: RejectionCounts) -> RejectionCounts {
        self.border += other.border;
        self.too_few_pixels += other.too_few_pixels;
        self.singular += other.singular;
        self.diverged += other.diverged;
        self.out_of_bounds += other.out_of_bounds;
        self.elongated += other.elongated;
        self
    }

    pub fn total(&self) -> usize {
        self.border
            + self.too_few_pixels
            + self.singular
            + self.diverged
            + self.out_of_bounds
            + self.elongated
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    /// Brightest first, truncated to `max_stars`.
    pub stars: StarVector,
    /// Fits matching `stars` index for index.
    pub psfs: Vec<Psf>,
    /// Mean shape over every accepted fit, before truncation.
    pub mean_psf: Option<MeanPsf>,
    /// Candidates found in the structure map.
    pub candidates: usize,
    /// Structure-map noise (MAD σ).
    pub noise: f32,
    pub rejected: RejectionCounts,
}

/// Per-worker fold state.
#[derive(Default)]
struct FitBatch {
    psfs: Vec<Psf>,
    accumulator: PsfAccumulator,
    rejected: RejectionCounts,
}

impl FitBatch {
    fn merge(mut self, other: FitBatch) -> FitBatch {
        self.psfs.extend(other.psfs);
        self.accumulator = self.accumulator.merge(other.accumulator);
        self.rejected = self.rejected.merge(other.rejected);
        self
    }
}

pub struct StarDetector {
    config: DetectionConfig,
    structure: Box<dyn StructureMap>,
}

impl Default for StarDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StarDetector {
    pub fn new() -> Self {
        Self::from_config(DetectionConfig::default())
    }

    pub fn from_config(config: DetectionConfig) -> Self {
        config.validate();
        let structure = Box::new(DifferenceOfGaussians::from_config(&config));
        Self { config, structure }
    }

    /// Replaces the structure-map transform (e.g. a wavelet layer).
    pub fn with_structure_map(mut self, structure: impl StructureMap + 'static) -> Self {
        self.structure = Box::new(structure);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn detect<T: Sample>(&self, image: &Image<T>) -> DetectionResult {
        match self.detect_with_progress(image, &SilentObserver, &Cancellation::new()) {
            Ok(result) => result,
            Err(Cancelled) => unreachable!("a fresh cancellation flag is never set"),
        }
    }

    pub fn detect_with_progress<T: Sample>(
        &self,
        image: &Image<T>,
        observer: &dyn ProgressObserver,
        cancel: &Cancellation,
    ) -> Result<DetectionResult, Cancelled> {
        if image.dimensions().is_empty() {
            return Ok(DetectionResult::default());
        }

        let tracker = ProgressTracker::new(observer, Stage::Detecting, 1, 0.0, 0.2);
        let luminance = image.luminance();
        let map = self.structure.compute(&luminance);
        let noise = structure::estimate_noise(&map);
        let threshold =
            candidates::detection_threshold(&map, noise, self.config.detection_sigma);
        let candidates = candidates::find_candidates(&map, threshold);
        tracker.advance(1);
        cancel.check()?;

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            noise,
            threshold,
            candidates = candidates.len(),
            "Structure map thresholded"
        );

        let tracker =
            ProgressTracker::new(observer, Stage::Fitting, candidates.len(), 0.2, 0.8);
        let radius = self.config.fit_radius;
        let model = self.config.psf_model;
        let min_roundness = self.config.min_roundness;

        let batch = candidates
            .par_chunks(FIT_BATCH)
            .fold(FitBatch::default, |mut batch, chunk| {
                if cancel.is_cancelled() {
                    return batch;
                }
                for candidate in chunk {
                    match fit_psf(&luminance, (candidate.x, candidate.y), radius, model) {
                        Ok(psf) if psf.roundness >= min_roundness => {
                            batch.accumulator.add(&psf);
                            batch.psfs.push(psf);
                        }
                        Ok(_) => batch.rejected.elongated += 1,
                        Err(failure) => batch.rejected.record(failure),
                    }
                }
                tracker.advance(chunk.len());
                batch
            })
            .reduce(FitBatch::default, FitBatch::merge);
        cancel.check()?;
        tracker.finish();

        let FitBatch {
            mut psfs,
            accumulator,
            rejected,
        } = batch;
        psfs.sort_by(|a, b| b.flux.total_cmp(&a.flux));
        if let Some(max) = self.config.max_stars {
            psfs.truncate(max);
        }
        let stars: StarVector = psfs.iter().map(Star::from_psf).collect();

        tracing::info!(
            stars = stars.len(),
            candidates = candidates.len(),
            rejected = rejected.total(),
            psf_model = %model,
            "Star detection finished"
        );

        Ok(DetectionResult {
            stars,
            psfs,
            mean_psf: accumulator.finish(model),
            candidates: candidates.len(),
            noise,
            rejected,
        })
    }
}
