//! Example: register and integrate raster frames from disk
//!
//! Detects stars in every frame, matches them against the reference frame
//! (the first path), stacks the aligned frames and optionally drizzles them.
//! All parameters come from a YAML file; missing keys keep their defaults.
//!
//! ```yaml
//! detection:
//!   fwhm: 3.5
//! matching:
//!   max_stars: 40
//! stacking:
//!   integration: average
//!   rejection:
//!     winsorized_sigma_clip: { low: 3.0, high: 3.0, max_iterations: 5 }
//!   normalization: additive
//!   weight_maps: true
//! drizzle:
//!   scale: 2.0
//!   pixfrac: 0.7
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example stack_rasters -- pipeline.yaml out/ light_*.sdr
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use siderea::{
    Cancellation, DetectionConfig, DrizzleConfig, FnObserver, Homography, MatchConfig,
    RasterOpener, StackConfig, StarDetector, drizzle_stack, fit_affine, fit_homography,
    load_raster, match_stars, rms_error, save_raster, stack_images,
};

/// Pairs needed before a full projective fit is preferred over an affine one.
const HOMOGRAPHY_MIN_PAIRS: usize = 12;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineConfig {
    detection: DetectionConfig,
    matching: MatchConfig,
    stacking: StackConfig,
    drizzle: Option<DrizzleConfig>,
    /// Directory for daily-rolling log files.
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        bail!("usage: stack_rasters <config.yaml> <output_dir> <reference> <frame>...");
    }
    let config = load_config(Path::new(&args[0]))?;
    common::log_setup::setup_logging("info", config.log_dir.as_deref());

    let output_dir = PathBuf::from(&args[1]);
    std::fs::create_dir_all(&output_dir)?;
    let paths: Vec<PathBuf> = args[2..].iter().map(PathBuf::from).collect();

    let detector = StarDetector::from_config(config.detection.clone());
    let reference = detect(&detector, &paths[0])?;
    tracing::info!(stars = reference.len(), path = %paths[0].display(), "Reference frame");

    // Frames that cannot be registered are left out.
    let mut registered = vec![(paths[0].clone(), Homography::identity())];
    for path in &paths[1..] {
        let stars = match detect(&detector, path) {
            Ok(stars) => stars,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable frame");
                continue;
            }
        };
        let pairs = match_stars(&reference, &stars, &config.matching);
        let homography = if pairs.len() >= HOMOGRAPHY_MIN_PAIRS {
            fit_homography(&pairs)
        } else {
            fit_affine(&pairs)
        };
        match homography {
            Some(homography) => {
                tracing::info!(
                    path = %path.display(),
                    pairs = pairs.len(),
                    rms = rms_error(&pairs, &homography),
                    "Registered"
                );
                registered.push((path.clone(), homography));
            }
            None => {
                tracing::warn!(path = %path.display(), pairs = pairs.len(), "Registration failed");
            }
        }
    }

    let (frame_paths, homographies): (Vec<PathBuf>, Vec<Homography>) =
        registered.into_iter().unzip();
    let observer = FnObserver::new(|_| {}, |message: &str| tracing::info!("{message}"));
    let cancel = Cancellation::new();

    let stacked = stack_images(
        &frame_paths,
        &homographies,
        &RasterOpener,
        &config.stacking,
        &observer,
        &cancel,
    )?;
    save_raster(output_dir.join("stacked.sdr"), &stacked.image, false)?;
    for (index, reason) in &stacked.report.failed {
        tracing::warn!(index, reason = %reason, "Frame excluded from stack");
    }

    if let Some(drizzle_config) = &config.drizzle {
        // Weight maps line up with the frames that were actually stacked.
        let stacked_paths: Vec<&PathBuf> = stacked
            .report
            .frames
            .iter()
            .map(|&i| &frame_paths[i])
            .collect();
        let stacked_homographies: Vec<Homography> = stacked
            .report
            .frames
            .iter()
            .map(|&i| homographies[i])
            .collect();
        let drizzled = drizzle_stack(
            &stacked_paths,
            &stacked_homographies,
            stacked.weight_maps.as_deref(),
            &RasterOpener,
            drizzle_config,
            &observer,
            &cancel,
        )?;
        save_raster(output_dir.join("drizzled.sdr"), &drizzled.image, false)?;
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn detect(detector: &StarDetector, path: &Path) -> Result<siderea::StarVector> {
    let image = load_raster(path)
        .with_context(|| format!("loading {}", path.display()))?
        .to_f32();
    Ok(detector.detect(&image).stars)
}
