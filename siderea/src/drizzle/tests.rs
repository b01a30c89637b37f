use std::path::PathBuf;

use strum::IntoEnumIterator;

use crate::image::{Image, Image32, ImageDimensions, save_raster};
use crate::math::Homography;
use crate::progress::{Cancellation, SilentObserver};
use crate::stacking::{self, RasterOpener, Rejection, StackConfig};
use crate::testing::{Recorder, SyntheticStar, init_tracing, render_star_field};

use super::*;

fn flat(width: usize, height: usize, value: f32) -> Image32 {
    Image32::filled(ImageDimensions::new(width, height, 1), value)
}

fn drizzle_one(image: &Image32, homography: Homography, config: DrizzleConfig) -> DrizzleResult {
    let mut drizzle = Drizzle::new(config);
    drizzle
        .add_frame(image, &homography, None)
        .expect("add frame");
    drizzle.finalize()
}

fn one_to_one() -> DrizzleConfig {
    DrizzleConfig::default().with_scale(1.0).with_pixfrac(1.0)
}

fn total_weight(drizzle: &Drizzle) -> f64 {
    drizzle
        .accumulator
        .as_ref()
        .expect("primed")
        .weights
        .iter()
        .map(|&w| w as f64)
        .sum()
}

#[test]
fn test_first_frame_primes_output_grid() {
    let mut drizzle = Drizzle::new(DrizzleConfig::x1_5());
    assert!(drizzle.is_initial_frame());
    assert_eq!(drizzle.output_dimensions(), None);

    drizzle
        .add_frame(&flat(10, 7, 0.5), &Homography::identity(), None)
        .expect("add frame");
    assert!(!drizzle.is_initial_frame());
    assert_eq!(drizzle.frame_count(), 1);
    assert_eq!(
        drizzle.output_dimensions(),
        Some(ImageDimensions::new(15, 11, 1))
    );
}

#[test]
fn test_flat_frame_stays_flat() {
    for kernel in [DrizzleKernel::Square, DrizzleKernel::Turbo] {
        let config = DrizzleConfig::x2().with_kernel(kernel);
        let result = drizzle_one(&flat(12, 9, 0.3), Homography::identity(), config);
        assert_eq!(result.image.dimensions(), ImageDimensions::new(24, 18, 1));
        assert!(
            result.image.data().iter().all(|&v| (v - 0.3).abs() < 1e-5),
            "{kernel}"
        );
        assert!(result.coverage.values().iter().all(|&c| (c - 1.0).abs() < 1e-5));
    }
}

#[test]
fn test_point_kernel_hits_pixel_under_centre() {
    let config = DrizzleConfig::x2()
        .with_kernel(DrizzleKernel::Point)
        .with_fill_value(-1.0);
    let result = drizzle_one(&flat(6, 5, 0.3), Homography::identity(), config);
    // Source centres land on odd output pixels.
    assert!((result.image.pixel(1, 1, 0) - 0.3).abs() < 1e-6);
    assert!((result.image.pixel(5, 3, 0) - 0.3).abs() < 1e-6);
    assert_eq!(result.image.pixel(0, 0, 0), -1.0);
    assert_eq!(result.image.pixel(2, 1, 0), -1.0);
    assert_eq!(result.coverage_at(2, 1), 0.0);
}

#[test]
fn test_unit_drops_reproduce_input() {
    let stars = [SyntheticStar::round(9.2, 6.7, 0.7, 1.5)];
    let image = render_star_field(20, 14, &stars, 0.1, 0.01, 3);
    for kernel in DrizzleKernel::iter() {
        let result = drizzle_one(&image, Homography::identity(), one_to_one().with_kernel(kernel));
        let max_diff = result
            .image
            .data()
            .iter()
            .zip(image.data())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);
        assert!(max_diff < 1e-6, "{kernel}: {max_diff}");
    }
}

#[test]
fn test_half_pixel_shift_averages_neighbours() {
    let (width, height) = (10, 4);
    let data = (0..height)
        .flat_map(|_| (0..width).map(|x| 0.1 * x as f32))
        .collect();
    let image = Image32::from_planar(ImageDimensions::new(width, height, 1), data);

    let result = drizzle_one(&image, Homography::translation(0.5, 0.0), one_to_one());
    assert!((result.image.pixel(0, 2, 0) - 0.0).abs() < 1e-6);
    for x in 1..width {
        let expected = 0.5 * (image.pixel(x - 1, 2, 0) + image.pixel(x, 2, 0));
        assert!((result.image.pixel(x, 2, 0) - expected).abs() < 1e-5, "x = {x}");
    }
}

#[test]
fn test_zero_weight_excludes_pixel() {
    let clean = flat(8, 8, 0.2);
    let mut hot = clean.clone();
    hot.set_pixel(3, 3, 0, 50.0);
    let mut weights = Image::filled(ImageDimensions::new(8, 8, 1), 255u8);
    weights.set_pixel(3, 3, 0, 0);

    let mut drizzle = Drizzle::new(one_to_one());
    drizzle
        .add_frame(&clean, &Homography::identity(), None)
        .expect("add clean");
    drizzle
        .add_frame(&hot, &Homography::identity(), Some(&weights))
        .expect("add hot");
    let result = drizzle.finalize();

    assert!((result.image.pixel(3, 3, 0) - 0.2).abs() < 1e-6);
    assert_eq!(result.frame_count, 2);
    // The excluded sample halves coverage there.
    assert!((result.coverage_at(3, 3) - 0.5).abs() < 1e-6);
    assert!((result.coverage_at(4, 3) - 1.0).abs() < 1e-6);
}

#[test]
fn test_partial_weight_scales_contribution() {
    let mut weights = Image::filled(ImageDimensions::new(4, 4, 1), 51u8);
    weights.set_pixel(0, 0, 0, 255);
    let mut drizzle = Drizzle::new(one_to_one().with_min_coverage(0.0));
    drizzle
        .add_frame(&flat(4, 4, 1.0), &Homography::identity(), None)
        .expect("add");
    drizzle
        .add_frame(&flat(4, 4, 0.0), &Homography::identity(), Some(&weights))
        .expect("add");
    let result = drizzle.finalize();
    // weight 0.2 on the zero frame: 1.0 / 1.2
    assert!((result.image.pixel(2, 2, 0) - 1.0 / 1.2).abs() < 1e-5);
    assert!((result.image.pixel(0, 0, 0) - 0.5).abs() < 1e-6);
}

#[test]
fn test_uncovered_pixels_get_fill_value() {
    let config = one_to_one().with_fill_value(-1.0);
    let result = drizzle_one(&flat(8, 4, 0.5), Homography::translation(4.0, 0.0), config);
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(result.image.pixel(x, y, 0), -1.0);
            assert_eq!(result.coverage_at(x, y), 0.0);
        }
        for x in 4..8 {
            assert!((result.image.pixel(x, y, 0) - 0.5).abs() < 1e-6);
        }
    }
}

#[test]
fn test_min_coverage_threshold() {
    // Half-pixel shift leaves the first column half covered.
    let config = one_to_one().with_min_coverage(0.6).with_fill_value(-1.0);
    let result = drizzle_one(&flat(6, 3, 0.5), Homography::translation(0.5, 0.0), config);
    assert_eq!(result.image.pixel(0, 1, 0), -1.0);
    assert!((result.image.pixel(1, 1, 0) - 0.5).abs() < 1e-6);
    assert!((result.coverage_at(0, 1) - 0.5).abs() < 1e-6);
}

#[test]
fn test_rotated_drops_conserve_area() {
    let pixfrac = 0.8;
    let scale = 2.0;
    for kernel in DrizzleKernel::iter() {
        let config = DrizzleConfig::x2().with_pixfrac(pixfrac).with_kernel(kernel);
        let mut drizzle = Drizzle::new(config);
        // Prime a 32×32 grid without contributing anything.
        let nothing = Image::filled(ImageDimensions::new(32, 32, 1), 0u8);
        drizzle
            .add_frame(&flat(32, 32, 0.0), &Homography::identity(), Some(&nothing))
            .expect("prime");
        assert_eq!(total_weight(&drizzle), 0.0);

        let small = flat(4, 4, 1.0);
        let h = Homography::similarity(1.0, 0.3, 12.0, 12.0);
        drizzle.add_frame(&small, &h, None).expect("add");

        let expected = 16.0 * (pixfrac * pixfrac * scale * scale) as f64;
        let total = total_weight(&drizzle);
        assert!((total - expected).abs() < 1e-3, "{kernel}: {total} vs {expected}");
    }
}

#[test]
fn test_rgb_drizzle() {
    let dims = ImageDimensions::new(5, 4, 3);
    let mut data = vec![0.1; dims.plane_len()];
    data.extend(vec![0.5; dims.plane_len()]);
    data.extend(vec![0.9; dims.plane_len()]);
    let image = Image32::from_planar(dims, data);
    let result = drizzle_one(&image, Homography::identity(), DrizzleConfig::x2());
    assert_eq!(result.image.channels(), 3);
    assert!((result.image.pixel(3, 3, 1) - 0.5).abs() < 1e-5);
    assert!((result.image.pixel(7, 5, 2) - 0.9).abs() < 1e-5);
}

#[test]
fn test_channel_mismatch_is_rejected() {
    let mut drizzle = Drizzle::new(DrizzleConfig::default());
    drizzle
        .add_frame(&flat(4, 4, 0.1), &Homography::identity(), None)
        .expect("prime");
    let rgb = Image32::new(ImageDimensions::new(4, 4, 3));
    let err = drizzle
        .add_frame(&rgb, &Homography::identity(), None)
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { index: 1, .. }));
    assert_eq!(drizzle.frame_count(), 1);
}

#[test]
fn test_singular_homography_is_rejected() {
    let mut drizzle = Drizzle::new(DrizzleConfig::default());
    let err = drizzle
        .add_frame(&flat(4, 4, 0.1), &Homography::scaling(0.0, 0.0), None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidHomography(HomographyIssue::Singular { index: 0 })
    ));
    assert!(drizzle.is_initial_frame());
}

#[test]
#[should_panic(expected = "Weight map")]
fn test_weight_map_size_mismatch_panics() {
    let mut drizzle = Drizzle::new(DrizzleConfig::default());
    let weights = Image::filled(ImageDimensions::new(3, 3, 1), 255u8);
    let _ = drizzle.add_frame(&flat(4, 4, 0.1), &Homography::identity(), Some(&weights));
}

#[test]
fn test_cancelled_frame() {
    let cancel = Cancellation::new();
    cancel.cancel();
    let mut drizzle = Drizzle::new(DrizzleConfig::default()).with_cancellation(cancel);
    let err = drizzle
        .add_frame(&flat(4, 4, 0.1), &Homography::identity(), None)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
}

#[test]
fn test_finalize_without_frames() {
    let result = Drizzle::new(DrizzleConfig::default()).finalize();
    assert_eq!(result.frame_count, 0);
    assert!(result.image.dimensions().is_empty());
}

#[test]
fn test_stacking_weight_maps_feed_drizzle() {
    // Every pixel stack is a permutation of 0.200..0.204.
    let dims = ImageDimensions::new(16, 16, 1);
    let mut frames: Vec<Image32> = (0..5)
        .map(|i| {
            let data = (0..dims.sample_count())
                .map(|p| 0.2 + 0.001 * ((i + p % 16 + p / 16) % 5) as f32)
                .collect();
            Image32::from_planar(dims, data)
        })
        .collect();
    frames[2].set_pixel(10, 10, 0, 10.0);
    let homographies = vec![Homography::identity(); 5];

    let stacked = stacking::stack_frames(
        &frames,
        &homographies,
        &StackConfig::default()
            .with_rejection(Rejection::sigma_clip(3.0))
            .with_weight_maps(),
        &SilentObserver,
        &Cancellation::new(),
    )
    .expect("stack");
    let maps = stacked.weight_maps.expect("weight maps");

    let mut drizzle = Drizzle::new(one_to_one());
    for ((frame, h), map) in frames.iter().zip(&homographies).zip(&maps) {
        drizzle.add_frame(frame, h, Some(map)).expect("add");
    }
    let result = drizzle.finalize();
    assert!((result.image.pixel(10, 10, 0) - 0.202).abs() < 1e-4);
    assert!((result.image.pixel(4, 4, 0) - 0.202).abs() < 1e-4);
}

fn tempdir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "siderea_drizzle_{}_{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn test_drizzle_stack_from_files() {
    init_tracing();
    let dir = tempdir();
    let shifts = [(0.0, 0.0), (0.5, 0.25), (-0.25, 0.5)];
    let stars = [SyntheticStar::round(8.0, 6.0, 0.5, 1.3)];
    let frames: Vec<Image<u16>> = (0..3)
        .map(|seed| render_star_field(16, 12, &stars, 0.1, 0.005, seed).convert())
        .collect();

    let mut paths = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("drizzle_{i}.sdr"));
        save_raster(&path, frame, false).expect("save");
        paths.push(path);
    }
    paths.insert(1, dir.join("does_not_exist.sdr"));
    let homographies: Vec<Homography> = [shifts[0], (0.0, 0.0), shifts[1], shifts[2]]
        .iter()
        .map(|&(tx, ty)| Homography::translation(tx, ty))
        .collect();

    let recorder = Recorder::default();
    let config = DrizzleConfig::x2();
    let result = drizzle_stack(
        &paths,
        &homographies,
        None,
        &RasterOpener,
        &config,
        &recorder,
        &Cancellation::new(),
    )
    .expect("drizzle");

    assert_eq!(result.frame_count, 3);
    assert_eq!(result.image.dimensions(), ImageDimensions::new(32, 24, 1));
    let messages = recorder.messages();
    assert_eq!(messages[0], "Drizzling");
    assert!(messages.iter().any(|m| m.starts_with("Skipping frame 1")));
    assert!(recorder.last_progress().expect("progress") > 0.999);

    let mut manual = Drizzle::new(config);
    for (frame, &(tx, ty)) in frames.iter().zip(&shifts) {
        manual
            .add_frame(frame, &Homography::translation(tx, ty), None)
            .expect("add");
    }
    let manual = manual.finalize();
    let max_diff = manual
        .image
        .data()
        .iter()
        .zip(result.image.data())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max);
    assert!(max_diff < 1e-6, "{max_diff}");
}

#[test]
fn test_drizzle_stack_errors() {
    let paths: [&str; 0] = [];
    let err = drizzle_stack(
        &paths,
        &[],
        None,
        &RasterOpener,
        &DrizzleConfig::default(),
        &SilentObserver,
        &Cancellation::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoFrames));

    let missing = ["/nonexistent/a.sdr", "/nonexistent/b.sdr"];
    let err = drizzle_stack(
        &missing,
        &[Homography::identity()],
        None,
        &RasterOpener,
        &DrizzleConfig::default(),
        &SilentObserver,
        &Cancellation::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidHomography(HomographyIssue::CountMismatch { .. })
    ));

    let err = drizzle_stack(
        &missing,
        &[Homography::identity(); 2],
        None,
        &RasterOpener,
        &DrizzleConfig::default(),
        &SilentObserver,
        &Cancellation::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoUsableFrames { attempted: 2 }));

    let cancel = Cancellation::new();
    cancel.cancel();
    let err = drizzle_stack(
        &missing,
        &[Homography::identity(); 2],
        None,
        &RasterOpener,
        &DrizzleConfig::default(),
        &SilentObserver,
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
}
