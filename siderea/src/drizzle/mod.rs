//! Drizzle: variable-pixel linear reconstruction onto a finer output grid.
//!
//! Every source pixel is shrunk to a drop of side `pixfrac`, projected into
//! the output grid through its frame's homography (scaled by `scale`) and
//! added to the output pixels it overlaps, weighted by overlap area and the
//! optional 8-bit weight map. Finalization divides the accumulated flux by
//! the accumulated weight.
//!
//! Output rows are processed in parallel bands; a band only writes its own
//! rows, so drops that straddle two bands are split between them.

mod config;
mod geometry;

#[cfg(test)]
mod tests;

use std::ops::Range;
use std::path::Path;

use arrayvec::ArrayVec;
use common::Buffer2;
use common::parallel::rows_per_chunk;
use glam::DVec2;
use rayon::prelude::*;

use crate::image::{Image, Image32, ImageDimensions, Sample};
use crate::math::Homography;
use crate::progress::{Cancellation, Cancelled, ProgressObserver, ProgressTracker, Stage};
use crate::stacking::{Error, FrameOpener, HomographyIssue, read_frame};

pub use config::{DrizzleConfig, DrizzleKernel};

use geometry::{boxer, quad_area, rect_overlap};

/// Channels handled per accumulator (RGBA).
const MAX_CHANNELS: usize = 4;

/// Drops with a smaller projected area are skipped.
const DEGENERATE_AREA: f64 = 1e-12;

/// Source pixels loaded around a band's projected extent.
const SOURCE_MARGIN: f64 = 2.0;

/// Perimeter samples per band edge when bounding its source region.
const EDGE_STEPS: usize = 16;

/// Interleaved (`[y][x][channel]`) flux and weight sums.
#[derive(Debug)]
struct Accumulator {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
    weights: Vec<f32>,
}

impl Accumulator {
    fn new(width: usize, height: usize, channels: usize) -> Self {
        let len = width * height * channels;
        Self {
            width,
            height,
            channels,
            data: vec![0.0; len],
            weights: vec![0.0; len],
        }
    }

    fn dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.width, self.height, self.channels)
    }
}

/// Result of a drizzle run.
#[derive(Debug, Clone)]
pub struct DrizzleResult {
    pub image: Image32,
    /// Channel-0 weight normalized to [0, 1] (1 = best covered pixel).
    pub coverage: Buffer2<f32>,
    /// Frames that contributed.
    pub frame_count: usize,
}

impl DrizzleResult {
    pub fn coverage_at(&self, x: usize, y: usize) -> f32 {
        self.coverage[(x, y)]
    }
}

/// Incremental drizzle accumulator. The first frame fixes the output grid
/// (`ceil(input × scale)`) and channel count.
#[derive(Debug)]
pub struct Drizzle {
    config: DrizzleConfig,
    cancel: Cancellation,
    accumulator: Option<Accumulator>,
    frame_count: usize,
}

/// Per-frame values every band worker reads.
struct FrameContext<'a, T> {
    image: &'a Image<T>,
    weight_map: Option<&'a Image<u8>>,
    /// Source pixel coordinates → output grid (homography then scale).
    to_output: Homography,
    /// Output grid → source pixel coordinates.
    from_output: Homography,
    kernel: DrizzleKernel,
    /// Half drop side in source pixels.
    half_drop: f64,
    pixfrac: f64,
    width: usize,
    channels: usize,
}

impl Drizzle {
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(config: DrizzleConfig) -> Self {
        config.validate();
        Self {
            config,
            cancel: Cancellation::new(),
            accumulator: None,
            frame_count: 0,
        }
    }

    /// Polls `cancel` between output bands.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DrizzleConfig {
        &self.config
    }

    /// True until the first frame has primed the output grid.
    pub fn is_initial_frame(&self) -> bool {
        self.accumulator.is_none()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Output dimensions once primed.
    pub fn output_dimensions(&self) -> Option<ImageDimensions> {
        self.accumulator.as_ref().map(Accumulator::dimensions)
    }

    /// Drizzles `image` into the output. `homography` maps the frame's pixel
    /// coordinates into the reference grid; `weight_map` (same size as
    /// `image`, one channel or one per image channel) scales every source
    /// pixel by `value / 255`, and 0 excludes it.
    ///
    /// # Panics
    ///
    /// Panics if `weight_map` does not match `image`, or if the first frame
    /// has more than four channels.
    pub fn add_frame<T: Sample>(
        &mut self,
        image: &Image<T>,
        homography: &Homography,
        weight_map: Option<&Image<u8>>,
    ) -> Result<(), Error> {
        self.add_indexed(self.frame_count, image, homography, weight_map)
    }

    /// [`Self::add_frame`] with `index` used in errors.
    fn add_indexed<T: Sample>(
        &mut self,
        index: usize,
        image: &Image<T>,
        homography: &Homography,
        weight_map: Option<&Image<u8>>,
    ) -> Result<(), Error> {
        let dims = image.dimensions();
        if let Some(map) = weight_map {
            assert!(
                map.width() == dims.width
                    && map.height() == dims.height
                    && (map.channels() == 1 || map.channels() == dims.channels),
                "Weight map {} does not match frame {}",
                map.dimensions(),
                dims
            );
        }
        if dims.is_empty() {
            tracing::warn!(index, "Skipping empty frame");
            return Ok(());
        }
        let inverse = homography
            .inverse()
            .ok_or(Error::InvalidHomography(HomographyIssue::Singular { index }))?;

        let scale = self.config.scale as f64;
        let accumulator = self.accumulator.get_or_insert_with(|| {
            assert!(
                dims.channels <= MAX_CHANNELS,
                "channels ({}) exceeds MAX_CHANNELS ({})",
                dims.channels,
                MAX_CHANNELS
            );
            let width = (dims.width as f64 * scale).ceil() as usize;
            let height = (dims.height as f64 * scale).ceil() as usize;
            tracing::debug!(
                output_width = width,
                output_height = height,
                channels = dims.channels,
                "Primed drizzle output"
            );
            Accumulator::new(width, height, dims.channels)
        });
        if accumulator.channels != dims.channels {
            return Err(Error::DimensionMismatch {
                index,
                expected: ImageDimensions::new(dims.width, dims.height, accumulator.channels),
                actual: dims,
            });
        }

        let ctx = FrameContext {
            image,
            weight_map,
            to_output: Homography::scaling(scale, scale).then_after(homography),
            from_output: inverse.then_after(&Homography::scaling(1.0 / scale, 1.0 / scale)),
            kernel: self.config.kernel,
            half_drop: 0.5 * self.config.pixfrac as f64,
            pixfrac: self.config.pixfrac as f64,
            width: accumulator.width,
            channels: accumulator.channels,
        };

        let row_len = accumulator.width * accumulator.channels;
        let band_rows = rows_per_chunk(accumulator.height);
        let cancel = &self.cancel;
        if row_len > 0 {
            accumulator
                .data
                .par_chunks_mut(band_rows * row_len)
                .zip(accumulator.weights.par_chunks_mut(band_rows * row_len))
                .enumerate()
                .try_for_each(|(band_idx, (data, weights))| -> Result<(), Cancelled> {
                    cancel.check()?;
                    let y0 = band_idx * band_rows;
                    let y1 = y0 + data.len() / row_len;
                    drizzle_band(&ctx, y0..y1, data, weights);
                    Ok(())
                })?;
        }

        self.frame_count += 1;
        Ok(())
    }

    /// Divides flux by weight. Pixels with no weight, or weight below
    /// `min_coverage × max_weight`, get `fill_value`.
    pub fn finalize(self) -> DrizzleResult {
        let Some(acc) = self.accumulator else {
            tracing::warn!("Finalizing drizzle without any frames");
            return DrizzleResult {
                image: Image32::new(ImageDimensions::new(0, 0, 1)),
                coverage: Buffer2::new_default(0, 0),
                frame_count: 0,
            };
        };

        let (width, height, channels) = (acc.width, acc.height, acc.channels);
        let mut coverage = Buffer2::new(
            width,
            height,
            acc.weights.iter().step_by(channels).copied().collect(),
        );
        let max_weight = coverage
            .values()
            .par_iter()
            .copied()
            .reduce(|| 0.0f32, f32::max);
        let threshold = self.config.min_coverage * max_weight;
        let fill_value = self.config.fill_value;

        let mut image = Image32::new(acc.dimensions());
        for channel in 0..channels {
            if width == 0 {
                break;
            }
            image
                .plane_mut(channel)
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, out) in row.iter_mut().enumerate() {
                        let idx = (y * width + x) * channels + channel;
                        let w = acc.weights[idx];
                        *out = if w > 0.0 && w >= threshold {
                            acc.data[idx] / w
                        } else {
                            fill_value
                        };
                    }
                });
        }

        if max_weight > 0.0 {
            let inv_max = 1.0 / max_weight;
            coverage
                .values_mut()
                .par_iter_mut()
                .for_each(|c| *c *= inv_max);
        }

        tracing::info!(
            frame_count = self.frame_count,
            output = %image.dimensions(),
            max_weight,
            "Drizzle complete"
        );

        DrizzleResult {
            image,
            coverage,
            frame_count: self.frame_count,
        }
    }
}

/// Drizzles every source pixel whose drop may reach output rows `rows` into
/// the band slices `data` / `weights` (which start at row `rows.start`).
fn drizzle_band<T: Sample>(
    ctx: &FrameContext<'_, T>,
    rows: Range<usize>,
    data: &mut [f32],
    weights: &mut [f32],
) {
    let Some((src_cols, src_rows)) = source_region(ctx, &rows) else {
        return;
    };
    let channels = ctx.channels;
    let band_top = rows.start as f64;
    let band_bottom = rows.end as f64;
    let out_right = ctx.width as f64;

    let mut add = |ox: usize, oy: usize, area: f64, values: &[f32], w: &[f32]| {
        let base = ((oy - rows.start) * ctx.width + ox) * channels;
        for c in 0..channels {
            let wa = w[c] * area as f32;
            data[base + c] += values[c] * wa;
            weights[base + c] += wa;
        }
    };

    for sy in src_rows {
        for sx in src_cols.clone() {
            let mut values = ArrayVec::<f32, MAX_CHANNELS>::new();
            let mut pixel_weights = ArrayVec::<f32, MAX_CHANNELS>::new();
            for c in 0..channels {
                let v = ctx.image.pixel(sx, sy, c).to_f32();
                let w = match ctx.weight_map {
                    Some(map) => {
                        let mc = if map.channels() == 1 { 0 } else { c };
                        map.pixel(sx, sy, mc) as f32 / 255.0
                    }
                    None => 1.0,
                };
                let (v, w) = if v.is_finite() { (v, w) } else { (0.0, 0.0) };
                values.push(v);
                pixel_weights.push(w);
            }
            if pixel_weights.iter().all(|&w| w == 0.0) {
                continue;
            }

            let centre = DVec2::new(sx as f64 + 0.5, sy as f64 + 0.5);
            match ctx.kernel {
                DrizzleKernel::Square => {
                    let h = ctx.half_drop;
                    let quad = [
                        DVec2::new(centre.x - h, centre.y - h),
                        DVec2::new(centre.x + h, centre.y - h),
                        DVec2::new(centre.x + h, centre.y + h),
                        DVec2::new(centre.x - h, centre.y + h),
                    ]
                    .map(|p| ctx.to_output.apply(p));
                    if !quad.iter().all(|p| p.is_finite()) || quad_area(&quad) < DEGENERATE_AREA {
                        continue;
                    }
                    let min = quad.iter().copied().fold(DVec2::INFINITY, DVec2::min);
                    let max = quad.iter().copied().fold(DVec2::NEG_INFINITY, DVec2::max);
                    for oy in clip(min.y, max.y, band_top, band_bottom) {
                        for ox in clip(min.x, max.x, 0.0, out_right) {
                            let area = boxer(ox as f64, oy as f64, &quad);
                            if area > 0.0 {
                                add(ox, oy, area, &values, &pixel_weights);
                            }
                        }
                    }
                }
                DrizzleKernel::Turbo => {
                    let c = ctx.to_output.apply(centre);
                    let side = ctx.pixfrac * ctx.to_output.local_area_scale(centre).sqrt();
                    if !c.is_finite() || side * side < DEGENERATE_AREA {
                        continue;
                    }
                    let half = DVec2::splat(0.5 * side);
                    let (min, max) = (c - half, c + half);
                    for oy in clip(min.y, max.y, band_top, band_bottom) {
                        for ox in clip(min.x, max.x, 0.0, out_right) {
                            let cell = DVec2::new(ox as f64, oy as f64);
                            let area = rect_overlap(min, max, cell, cell + DVec2::ONE);
                            if area > 0.0 {
                                add(ox, oy, area, &values, &pixel_weights);
                            }
                        }
                    }
                }
                DrizzleKernel::Point => {
                    let c = ctx.to_output.apply(centre);
                    if !(c.x >= 0.0 && c.x < out_right && c.y >= band_top && c.y < band_bottom) {
                        continue;
                    }
                    let area =
                        ctx.pixfrac * ctx.pixfrac * ctx.to_output.local_area_scale(centre);
                    if area >= DEGENERATE_AREA {
                        add(c.x as usize, c.y as usize, area, &values, &pixel_weights);
                    }
                }
            }
        }
    }
}

/// Integer cells of `[lo, hi]` inside `[min, max)`.
#[inline]
fn clip(lo: f64, hi: f64, min: f64, max: f64) -> Range<usize> {
    let start = lo.floor().max(min);
    let end = hi.ceil().min(max);
    if end > start {
        start as usize..end as usize
    } else {
        0..0
    }
}

/// Source columns and rows whose drops may land in output rows `rows`.
fn source_region<T: Sample>(
    ctx: &FrameContext<'_, T>,
    rows: &Range<usize>,
) -> Option<(Range<usize>, Range<usize>)> {
    let src = ctx.image.dimensions();
    let full = || Some((0..src.width, 0..src.height));
    let (top, bottom) = (rows.start as f64, rows.end as f64);
    let right = ctx.width as f64;
    let mut min = DVec2::INFINITY;
    let mut max = DVec2::NEG_INFINITY;

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
            let s = ctx.from_output.apply(p);
            if !s.is_finite() {
                // The band straddles the horizon of a projective map.
                return full();
            }
            min = min.min(s);
            max = max.max(s);
        }
    }

    let cols = clip(
        min.x - SOURCE_MARGIN,
        max.x + SOURCE_MARGIN,
        0.0,
        src.width as f64,
    );
    let rows = clip(
        min.y - SOURCE_MARGIN,
        max.y + SOURCE_MARGIN,
        0.0,
        src.height as f64,
    );
    (!cols.is_empty() && !rows.is_empty()).then_some((cols, rows))
}

/// Drizzles the frames at `paths` into one output. `weight_maps`, when given,
/// holds one map per path.
///
/// Frames that fail to open are reported and skipped.
///
/// # Panics
///
/// Panics if `config` is invalid or the weight map count differs from the path count.
pub fn drizzle_stack<P, O>(
    paths: &[P],
    homographies: &[Homography],
    weight_maps: Option<&[Image<u8>]>,
    opener: &O,
    config: &DrizzleConfig,
    observer: &dyn ProgressObserver,
    cancel: &Cancellation,
) -> Result<DrizzleResult, Error>
where
    P: AsRef<Path> + Sync,
    O: FrameOpener,
{
    config.validate();
    if paths.is_empty() {
        return Err(Error::NoFrames);
    }
    if paths.len() != homographies.len() {
        return Err(Error::InvalidHomography(HomographyIssue::CountMismatch {
            frames: paths.len(),
            homographies: homographies.len(),
        }));
    }
    if let Some(maps) = weight_maps {
        assert_eq!(
            maps.len(),
            paths.len(),
            "Number of weight maps ({}) must match number of paths ({})",
            maps.len(),
            paths.len()
        );
    }

    tracing::info!(
        frame_count = paths.len(),
        scale = config.scale,
        pixfrac = config.pixfrac,
        kernel = %config.kernel,
        "Starting drizzle"
    );

    let tracker = ProgressTracker::new(observer, Stage::Drizzling, paths.len(), 0.0, 1.0);
    let mut drizzle = Drizzle::new(config.clone()).with_cancellation(cancel.clone());

    for (index, path) in paths.iter().enumerate() {
        cancel.check()?;
        let reader = match opener.open(path.as_ref()) {
            Ok(reader) => reader,
            Err(err) => {
                tracker.message(&format!("Skipping frame {index}: {err}"));
                tracing::warn!(index, error = %err, "Skipping frame that failed to open");
                tracker.advance(1);
                continue;
            }
        };
        let image = read_frame(&reader).map_err(|source| Error::FrameRead { index, source })?;
        let weight_map = weight_maps.map(|maps| &maps[index]);
        drizzle.add_indexed(index, &image, &homographies[index], weight_map)?;
        tracker.advance(1);
    }

    if drizzle.is_initial_frame() {
        return Err(Error::NoUsableFrames {
            attempted: paths.len(),
        });
    }
    tracker.finish();
    Ok(drizzle.finalize())
}
