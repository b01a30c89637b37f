//! The stacking pipeline: open → measure → normalize → per-pixel reject and integrate.

use std::ops::Range;
use std::path::Path;

use common::parallel::{par_map_limited, rows_per_chunk, try_par_map_limited};
use glam::DVec2;
use rayon::prelude::*;

use crate::image::{Image, Image32, ImageDimensions};
use crate::math::Homography;
use crate::progress::{Cancellation, ProgressObserver, ProgressTracker, Stage};

use super::config::{Interpolation, StackConfig};
use super::error::{Error, HomographyIssue};
use super::estimators::{
    FrameNorm, ScaleEstimators, compute_frame_norms, compute_scale_estimators,
    select_reference_frame,
};
use super::frame::{FrameOpener, FrameReader};
use super::rejection::{Origin, PixelStack, ScratchBuffers};

/// Extra source rows loaded around a band's projected extent.
const ROW_MARGIN: f64 = 2.0;

/// Perimeter samples per band edge when bounding its source rows.
const EDGE_STEPS: usize = 16;

const WEIGHT_ACCEPTED: u8 = 255;
const WEIGHT_REJECTED: u8 = 0;

/// What happened during a stacking run.
#[derive(Debug, Clone, Default)]
pub struct StackReport {
    /// Input indices of the stacked frames, in input order.
    pub frames: Vec<usize>,
    /// Input index and reason for every frame that could not be opened.
    pub failed: Vec<(usize, String)>,
    /// Input index of the normalization reference.
    pub reference_frame: usize,
    /// Per stacked frame, per channel.
    pub estimators: Vec<Vec<ScaleEstimators>>,
    /// Samples that entered a pixel stack.
    pub total_samples: u64,
    /// Samples dropped or clamped by rejection.
    pub rejected_samples: u64,
    /// Output samples no frame covered; they are 0.
    pub empty_pixels: u64,
}

#[derive(Debug, Clone)]
pub struct StackResult {
    pub image: Image32,
    pub report: StackReport,
    /// One mask per stacked frame (aligned with `report.frames`), in that
    /// frame's own pixel grid: 255 where every sample was accepted, 0 where
    /// rejection dropped or clamped one.
    pub weight_maps: Option<Vec<Image<u8>>>,
}

/// Stacks the frames at `paths`. `homographies[i]` maps frame `i` into the
/// output (reference) grid.
///
/// Frames that fail to open are reported and skipped.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn stack_images<P, O>(
    paths: &[P],
    homographies: &[Homography],
    opener: &O,
    config: &StackConfig,
    observer: &dyn ProgressObserver,
    cancel: &Cancellation,
) -> Result<StackResult, Error>
where
    P: AsRef<Path> + Sync,
    O: FrameOpener,
{
    config.validate();
    check_inputs(paths.len(), homographies.len())?;

    tracing::info!(
        frame_count = paths.len(),
        integration = %config.integration,
        rejection = %config.rejection,
        normalization = %config.normalization,
        "Starting stack"
    );

    let tracker = ProgressTracker::new(observer, Stage::Opening, paths.len(), 0.0, 0.1);
    let opened = par_map_limited(paths, config.max_open_frames, |_, path| {
        let frame = opener.open(path.as_ref());
        tracker.advance(1);
        frame
    });
    cancel.check()?;

    let mut frames = Vec::with_capacity(opened.len());
    let mut indices = Vec::with_capacity(opened.len());
    let mut failed = Vec::new();
    for (index, result) in opened.into_iter().enumerate() {
        match result {
            Ok(frame) => {
                frames.push(frame);
                indices.push(index);
            }
            Err(err) => {
                let reason = err.to_string();
                tracker.message(&format!("Skipping frame {index}: {reason}"));
                tracing::warn!(index, error = %reason, "Skipping frame that failed to open");
                failed.push((index, reason));
            }
        }
    }
    if frames.is_empty() {
        return Err(Error::NoUsableFrames {
            attempted: paths.len(),
        });
    }

    let homographies: Vec<Homography> = indices.iter().map(|&i| homographies[i]).collect();
    let (image, mut report, weight_maps) =
        run(&frames, &indices, &homographies, config, observer, cancel)?;
    report.failed = failed;
    Ok(StackResult {
        image,
        report,
        weight_maps,
    })
}

/// Stacks already opened frames, e.g. in-memory images.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn stack_frames<R: FrameReader>(
    frames: &[R],
    homographies: &[Homography],
    config: &StackConfig,
    observer: &dyn ProgressObserver,
    cancel: &Cancellation,
) -> Result<StackResult, Error> {
    config.validate();
    check_inputs(frames.len(), homographies.len())?;

    tracing::info!(
        frame_count = frames.len(),
        integration = %config.integration,
        rejection = %config.rejection,
        normalization = %config.normalization,
        "Starting stack"
    );

    let indices: Vec<usize> = (0..frames.len()).collect();
    let (image, report, weight_maps) =
        run(frames, &indices, homographies, config, observer, cancel)?;
    Ok(StackResult {
        image,
        report,
        weight_maps,
    })
}

fn check_inputs(frames: usize, homographies: usize) -> Result<(), Error> {
    if frames == 0 {
        return Err(Error::NoFrames);
    }
    if frames != homographies {
        return Err(Error::InvalidHomography(HomographyIssue::CountMismatch {
            frames,
            homographies,
        }));
    }
    Ok(())
}

/// Everything a band worker needs, shared read-only.
struct BandContext<'a, R> {
    frames: &'a [R],
    indices: &'a [usize],
    inverses: &'a [Homography],
    norms: &'a [FrameNorm],
    config: &'a StackConfig,
    dims: ImageDimensions,
    cancel: &'a Cancellation,
}

/// Per-band counters and rejection records.
#[derive(Default)]
struct BandOutcome {
    rejected: Vec<Origin>,
    total: u64,
    rejected_samples: u64,
    empty: u64,
}

/// Source rows of one frame loaded for one band.
struct LoadedRows {
    rows: Range<usize>,
    data: Vec<f32>,
}

type RunOutput = (Image32, StackReport, Option<Vec<Image<u8>>>);

/// `indices[k]` is the input index of `frames[k]`; `homographies` is aligned with `frames`.
fn run<R: FrameReader>(
    frames: &[R],
    indices: &[usize],
    homographies: &[Homography],
    config: &StackConfig,
    observer: &dyn ProgressObserver,
    cancel: &Cancellation,
) -> Result<RunOutput, Error> {
    let dims = frames[0].dimensions();
    for (frame, &index) in frames.iter().zip(indices) {
        let actual = frame.dimensions();
        if actual != dims {
            return Err(Error::DimensionMismatch {
                index,
                expected: dims,
                actual,
            });
        }
    }

    let inverses = homographies
        .iter()
        .zip(indices)
        .map(|(h, &index)| {
            h.inverse()
                .ok_or(Error::InvalidHomography(HomographyIssue::Singular { index }))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tracker = ProgressTracker::new(observer, Stage::Estimating, frames.len(), 0.1, 0.2);
    let estimators = try_par_map_limited(frames, config.max_open_frames, |k, frame| {
        let stats = compute_scale_estimators(frame).map_err(|source| Error::FrameRead {
            index: indices[k],
            source,
        });
        tracker.advance(1);
        stats
    })?;
    cancel.check()?;

    let reference = match config.reference_frame {
        Some(wanted) => match indices.iter().position(|&i| i == wanted) {
            Some(position) => position,
            None => {
                tracing::warn!(
                    reference_frame = wanted,
                    "Configured reference frame is not available, using the lowest-noise frame"
                );
                select_reference_frame(&estimators)
            }
        },
        None => select_reference_frame(&estimators),
    };
    let norms = compute_frame_norms(
        &estimators,
        config.normalization,
        config.estimator,
        reference,
    );
    tracing::debug!(
        reference_frame = indices[reference],
        normalization = %config.normalization,
        estimator = %config.estimator,
        "Computed normalization"
    );

    let ctx = BandContext {
        frames,
        indices,
        inverses: &inverses,
        norms: &norms,
        config,
        dims,
        cancel,
    };

    let width = dims.width;
    let band_rows = rows_per_chunk(dims.height);
    let bands_per_channel = dims.height.div_ceil(band_rows);
    let tracker = ProgressTracker::new(
        observer,
        Stage::Integrating,
        bands_per_channel * dims.channels,
        0.3,
        0.7,
    );

    let mut image = Image32::new(dims);
    let mut rejected_by_channel = Vec::with_capacity(dims.channels);
    let mut report = StackReport {
        frames: indices.to_vec(),
        reference_frame: indices[reference],
        ..Default::default()
    };

    for channel in 0..dims.channels {
        if dims.is_empty() {
            rejected_by_channel.push(Vec::new());
            continue;
        }
        let outcomes = image
            .plane_mut(channel)
            .par_chunks_mut(band_rows * width)
            .enumerate()
            .map(|(band_idx, out)| {
                let outcome = process_band(&ctx, channel, band_idx * band_rows, out);
                tracker.advance(1);
                outcome
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rejected = Vec::new();
        for outcome in outcomes {
            report.total_samples += outcome.total;
            report.rejected_samples += outcome.rejected_samples;
            report.empty_pixels += outcome.empty;
            rejected.extend(outcome.rejected);
        }
        rejected_by_channel.push(rejected);
    }
    tracker.finish();

    let weight_maps = config
        .weight_maps
        .then(|| build_weight_maps(frames.len(), dims, &rejected_by_channel));

    tracing::info!(
        frame_count = frames.len(),
        reference_frame = report.reference_frame,
        total_samples = report.total_samples,
        rejected_samples = report.rejected_samples,
        empty_pixels = report.empty_pixels,
        "Stack complete"
    );

    report.estimators = estimators;
    Ok((image, report, weight_maps))
}

/// Integrates output rows starting at `y0` of `channel` into `out`.
fn process_band<R: FrameReader>(
    ctx: &BandContext<'_, R>,
    channel: usize,
    y0: usize,
    out: &mut [f32],
) -> Result<BandOutcome, Error> {
    ctx.cancel.check()?;

    let dims = ctx.dims;
    let width = dims.width;
    let y1 = y0 + out.len() / width;

    let mut loaded: Vec<Option<LoadedRows>> = Vec::with_capacity(ctx.frames.len());
    for (k, (frame, inverse)) in ctx.frames.iter().zip(ctx.inverses).enumerate() {
        let Some(rows) = source_rows(inverse, width, y0, y1, dims.height) else {
            loaded.push(None);
            continue;
        };
        let mut data = vec![0.0; rows.len() * width];
        frame
            .read_rows(channel, rows.clone(), &mut data)
            .map_err(|source| Error::FrameRead {
                index: ctx.indices[k],
                source,
            })?;
        loaded.push(Some(LoadedRows { rows, data }));
    }

    let config = ctx.config;
    let mut outcome = BandOutcome::default();
    let mut stack = PixelStack::with_capacity(ctx.frames.len());
    let mut scratch = ScratchBuffers::default();

    for (row_idx, row) in out.chunks_exact_mut(width).enumerate() {
        let y = y0 + row_idx;
        for (x, pixel) in row.iter_mut().enumerate() {
            let centre = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);

            stack.clear();
            for (k, rows) in loaded.iter().enumerate() {
                let Some(rows) = rows else { continue };
                let source = ctx.inverses[k].apply(centre);
                let Some((value, source_pixel)) =
                    sample(rows, dims, source, config.interpolation)
                else {
                    continue;
                };
                if !value.is_finite() {
                    continue;
                }
                let norm = ctx.norms[k].channels[channel];
                stack.push(
                    norm.apply(value),
                    Origin {
                        frame: k as u32,
                        pixel: source_pixel,
                    },
                );
            }

            if stack.is_empty() {
                outcome.empty += 1;
                *pixel = 0.0;
                continue;
            }
            outcome.total += stack.len() as u64;

            config.rejection.apply(&mut stack, &mut scratch);
            outcome.rejected_samples += scratch.rejected.len() as u64;
            if config.weight_maps {
                outcome.rejected.extend_from_slice(&scratch.rejected);
            }

            *pixel = config.integration.integrate(stack.values_mut());
        }
    }

    Ok(outcome)
}

/// Source rows a band of output rows `y0..y1` can sample, padded by
/// [`ROW_MARGIN`]. `None` when the band misses the frame entirely.
fn source_rows(
    inverse: &Homography,
    width: usize,
    y0: usize,
    y1: usize,
    height: usize,
) -> Option<Range<usize>> {
    let (top, bottom) = (y0 as f64, y1 as f64);
    let right = width as f64;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for i in 0..=EDGE_STEPS {
        let t = i as f64 / EDGE_STEPS as f64;
        let x = t * right;
        let y = top + t * (bottom - top);
        for p in [
            DVec2::new(x, top),
            DVec2::new(x, bottom),
            DVec2::new(0.0, y),
            DVec2::new(right, y),
        ] {
            let s = inverse.apply(p);
            if !s.y.is_finite() {
                // The band straddles the horizon of a projective map.
                return (height > 0).then_some(0..height);
            }
            min_y = min_y.min(s.y);
            max_y = max_y.max(s.y);
        }
    }

    let start = (min_y - ROW_MARGIN).floor().max(0.0) as usize;
    let end = ((max_y + ROW_MARGIN).ceil().max(0.0) as usize).min(height);
    (start < end).then_some(start..end)
}

/// Samples loaded rows at continuous source position `p`. Returns the value
/// and the index (`y * width + x`) of the pixel containing `p`; `None` outside
/// the frame.
fn sample(
    loaded: &LoadedRows,
    dims: ImageDimensions,
    p: DVec2,
    interpolation: Interpolation,
) -> Option<(f32, u32)> {
    let (width, height) = (dims.width, dims.height);
    if !(p.x >= 0.0 && p.y >= 0.0 && p.x < width as f64 && p.y < height as f64) {
        return None;
    }
    let px = p.x as usize;
    let py = p.y as usize;
    let source_pixel = (py * width + px) as u32;

    let at = |x: usize, y: usize| -> Option<f32> {
        loaded
            .rows
            .contains(&y)
            .then(|| loaded.data[(y - loaded.rows.start) * width + x])
    };

    let value = match interpolation {
        Interpolation::Nearest => at(px, py)?,
        Interpolation::Bilinear => {
            let fx = p.x - 0.5;
            let fy = p.y - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let tx = (fx - x0) as f32;
            let ty = (fy - y0) as f32;

            let clamp_x = |v: f64| v.clamp(0.0, (width - 1) as f64) as usize;
            let clamp_y = |v: f64| v.clamp(0.0, (height - 1) as f64) as usize;
            let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
            let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

            let top = at(xa, ya)? * (1.0 - tx) + at(xb, ya)? * tx;
            let bottom = at(xa, yb)? * (1.0 - tx) + at(xb, yb)? * tx;
            top * (1.0 - ty) + bottom * ty
        }
    };
    Some((value, source_pixel))
}

/// Merges the per-channel rejection records into per-frame masks.
fn build_weight_maps(
    frame_count: usize,
    dims: ImageDimensions,
    rejected_by_channel: &[Vec<Origin>],
) -> Vec<Image<u8>> {
    let mut maps = vec![Image::filled(dims, WEIGHT_ACCEPTED); frame_count];
    for (channel, rejected) in rejected_by_channel.iter().enumerate() {
        for origin in rejected {
            maps[origin.frame as usize].plane_mut(channel)[origin.pixel as usize] =
                WEIGHT_REJECTED;
        }
    }
    maps
}
