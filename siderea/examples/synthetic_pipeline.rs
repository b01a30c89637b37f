//! Example: full pipeline on synthetic frames
//!
//! Renders a handful of noisy star fields with small random offsets and
//! rotations, writes them as raster files, then detects stars, matches every
//! frame against the first, stacks with sigma clipping and drizzles the
//! result using the stacking weight maps.
//!
//! Output:
//! ```text
//! test_output/synthetic/
//!   frame_00.sdr ... frame_07.sdr
//!   stacked.sdr
//!   weights_00.sdr ...
//!   drizzled.sdr
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example synthetic_pipeline
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use siderea::{
    Cancellation, DetectionConfig, DrizzleConfig, FnObserver, Homography, Image32,
    ImageDimensions, MatchConfig, RasterOpener, StackConfig, StarDetector,
    drizzle_stack, fit_affine, match_stars, rms_error, save_raster, stack_images,
};

const WIDTH: usize = 512;
const HEIGHT: usize = 384;
const FRAME_COUNT: usize = 8;
const STAR_COUNT: usize = 120;
const STAR_SIGMA: f64 = 1.4;
const BACKGROUND: f32 = 0.05;
const NOISE_SIGMA: f32 = 0.004;

fn main() -> Result<()> {
    common::log_setup::setup_logging("info", None);

    let output_dir = PathBuf::from("test_output/synthetic");
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(7);
    let stars: Vec<(f64, f64, f32)> = (0..STAR_COUNT)
        .map(|_| {
            (
                rng.random_range(0.0..WIDTH as f64),
                rng.random_range(0.0..HEIGHT as f64),
                rng.random_range(0.05f32..0.9),
            )
        })
        .collect();

    // Frame k sees the sky through the inverse of `truth[k]`.
    let mut truth = vec![Homography::identity()];
    for _ in 1..FRAME_COUNT {
        truth.push(Homography::similarity(
            1.0,
            rng.random_range(-0.01..0.01),
            rng.random_range(-6.0..6.0),
            rng.random_range(-6.0..6.0),
        ));
    }

    let mut paths = Vec::with_capacity(FRAME_COUNT);
    for (k, to_reference) in truth.iter().enumerate() {
        let to_frame = to_reference
            .inverse()
            .context("synthetic transform is invertible")?;
        let frame = render(&stars, &to_frame, &mut rng);
        let path = output_dir.join(format!("frame_{k:02}.sdr"));
        save_raster(&path, &frame, true).with_context(|| format!("writing {}", path.display()))?;
        paths.push(path);
    }
    tracing::info!(frame_count = paths.len(), "Synthetic frames written");

    // Registration
    let start = Instant::now();
    let detector = StarDetector::from_config(DetectionConfig::for_fwhm(2.355 * STAR_SIGMA));
    let detections: Vec<_> = paths
        .iter()
        .map(|path| -> Result<_> {
            let image = siderea::load_raster(path)?.to_f32();
            Ok(detector.detect(&image))
        })
        .collect::<Result<_>>()?;

    let match_config = MatchConfig::default();
    let mut homographies = vec![Homography::identity()];
    for (k, detection) in detections.iter().enumerate().skip(1) {
        let pairs = match_stars(&detections[0].stars, &detection.stars, &match_config);
        let homography = fit_affine(&pairs)
            .with_context(|| format!("frame {k}: only {} pairs", pairs.len()))?;
        tracing::info!(
            frame = k,
            stars = detection.stars.len(),
            pairs = pairs.len(),
            rms = rms_error(&pairs, &homography),
            "Registered"
        );
        homographies.push(homography);
    }
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Registration done");

    let observer = FnObserver::new(
        |fraction| tracing::debug!(fraction, "Progress"),
        |message: &str| tracing::info!("{message}"),
    );
    let cancel = Cancellation::new();

    // Stacking
    let stack_config = StackConfig::sigma_clipped(2.5).with_weight_maps();
    let stacked = stack_images(
        &paths,
        &homographies,
        &RasterOpener,
        &stack_config,
        &observer,
        &cancel,
    )?;
    save_raster(output_dir.join("stacked.sdr"), &stacked.image, false)?;
    let weight_maps = stacked.weight_maps.unwrap_or_default();
    for (k, map) in weight_maps.iter().enumerate() {
        save_raster(output_dir.join(format!("weights_{k:02}.sdr")), map, true)?;
    }
    tracing::info!(
        rejected = stacked.report.rejected_samples,
        total = stacked.report.total_samples,
        "Stacked"
    );

    // Drizzle, using the stacking masks to drop rejected samples
    let maps = (weight_maps.len() == paths.len()).then_some(weight_maps.as_slice());
    let drizzled = drizzle_stack(
        &paths,
        &homographies,
        maps,
        &RasterOpener,
        &DrizzleConfig::x2(),
        &observer,
        &cancel,
    )?;
    save_raster(output_dir.join("drizzled.sdr"), &drizzled.image, false)?;
    tracing::info!(
        output = %drizzled.image.dimensions(),
        frames = drizzled.frame_count,
        "Drizzled"
    );

    Ok(())
}

/// Renders `stars` (reference coordinates) as seen through `to_frame`.
fn render(stars: &[(f64, f64, f32)], to_frame: &Homography, rng: &mut StdRng) -> Image32 {
    let mut image = Image32::filled(ImageDimensions::new(WIDTH, HEIGHT, 1), BACKGROUND);
    let reach = (5.0 * STAR_SIGMA).ceil() as i64;
    for &(x, y, amplitude) in stars {
        let p = to_frame.apply(glam::DVec2::new(x, y));
        let (cx, cy) = (p.x.floor() as i64, p.y.floor() as i64);
        for py in (cy - reach).max(0)..(cy + reach + 1).min(HEIGHT as i64) {
            for px in (cx - reach).max(0)..(cx + reach + 1).min(WIDTH as i64) {
                let dx = px as f64 + 0.5 - p.x;
                let dy = py as f64 + 0.5 - p.y;
                let r2 = (dx * dx + dy * dy) / (STAR_SIGMA * STAR_SIGMA);
                let (px, py) = (px as usize, py as usize);
                let value = image.pixel(px, py, 0) + amplitude * (-0.5 * r2).exp() as f32;
                image.set_pixel(px, py, 0, value);
            }
        }
    }
    for value in image.data_mut() {
        // Box-Muller
        let u1: f32 = rng.random_range(f32::EPSILON..1.0);
        let u2: f32 = rng.random();
        *value += NOISE_SIGMA * (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
    }
    image
}
