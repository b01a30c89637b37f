//! Siderea - multi-frame registration and integration for astronomical images.
//!
//! - Star detection with Gaussian/Moffat PSF fitting
//! - Star-pattern matching by triangle similarity voting
//! - Frame stacking with normalization and outlier rejection
//! - Drizzle resampling onto a finer output grid
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use siderea::{DetectionConfig, MatchConfig, StarDetector, fit_affine, match_stars};
//!
//! let detector = StarDetector::from_config(DetectionConfig::default());
//! let reference = detector.detect(&reference_image);
//! let target = detector.detect(&target_image);
//!
//! let pairs = match_stars(&reference.stars, &target.stars, &MatchConfig::default());
//! let homography = fit_affine(&pairs).expect("enough pairs");
//! ```

pub mod drizzle;
pub mod image;
pub mod math;
pub mod progress;
pub mod registration;
pub mod stacking;
pub mod star_detection;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use image::{
    BitDepth, Image, Image32, ImageDimensions, RasterError, RasterImage, Sample, load_raster,
    save_raster,
};
pub use math::{Homography, Matrix};
pub use progress::{Cancellation, Cancelled, FnObserver, ProgressObserver, SilentObserver, Stage};

// ============================================================================
// Star detection
// ============================================================================

pub use star_detection::{
    DetectionConfig, DetectionResult, MeanPsf, Psf, PsfModel, Star, StarDetector, StarVector,
    sort_by_luminance,
};

// ============================================================================
// Registration
// ============================================================================

pub use registration::{
    MatchConfig, StarPair, StarPairVector, fit_affine, fit_homography, match_stars, rms_error,
};

// ============================================================================
// Stacking
// ============================================================================

pub use stacking::{
    Error as StackError, Estimator, FrameOpener, FrameReader, Integration, Interpolation,
    Normalization, RasterOpener, Rejection, StackConfig, StackReport, StackResult, stack_frames,
    stack_images,
};

// ============================================================================
// Drizzle
// ============================================================================

pub use drizzle::{Drizzle, DrizzleConfig, DrizzleKernel, DrizzleResult, drizzle_stack};
