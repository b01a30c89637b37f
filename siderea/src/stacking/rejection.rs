//! Per-pixel outlier rejection.
//!
//! Every policy works in place on a [`PixelStack`]: survivors end up in the
//! stack, and each dropped or clamped sample's [`Origin`] is appended to
//! `ScratchBuffers::rejected` so weight maps can trace it back to its frame.

use crate::math::{mad_to_sigma, median_and_mad_f32_mut};

use super::config::Rejection;

/// Insertion sort below this stack size, permutation sort above.
const INSERTION_SORT_THRESHOLD: usize = 64;

/// Rounding slack when turning percentile fractions into ranks.
const RANK_EPS: f32 = 1e-4;

/// Where a stacked sample came from: frame slot and the nearest source pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Origin {
    pub frame: u32,
    /// `y * width + x` in the source frame.
    pub pixel: u32,
}

/// Same-position samples of one output pixel, one per contributing frame.
#[derive(Debug, Default)]
pub(crate) struct PixelStack {
    values: Vec<f32>,
    origins: Vec<Origin>,
}

impl PixelStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            origins: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.values.clear();
        self.origins.clear();
    }

    #[inline]
    pub fn push(&mut self, value: f32, origin: Origin) {
        self.values.push(value);
        self.origins.push(origin);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    #[inline]
    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        self.values.swap(a, b);
        self.origins.swap(a, b);
    }

    /// Drops everything from `len` on, recording the dropped origins.
    fn truncate_into(&mut self, len: usize, rejected: &mut Vec<Origin>) {
        rejected.extend_from_slice(&self.origins[len..]);
        self.values.truncate(len);
        self.origins.truncate(len);
    }

    /// Sorts samples ascending, keeping origins aligned.
    fn sort(&mut self) {
        let n = self.len();
        if n <= INSERTION_SORT_THRESHOLD {
            for i in 1..n {
                let mut j = i;
                while j > 0 && self.values[j - 1] > self.values[j] {
                    self.swap(j - 1, j);
                    j -= 1;
                }
            }
        } else {
            let mut perm: Vec<usize> = (0..n).collect();
            perm.sort_unstable_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
            let values = perm.iter().map(|&i| self.values[i]).collect();
            let origins = perm.iter().map(|&i| self.origins[i]).collect();
            self.values = values;
            self.origins = origins;
        }
    }
}

/// Reusable per-worker buffers.
#[derive(Debug, Default)]
pub(crate) struct ScratchBuffers {
    pub values: Vec<f32>,
    /// Overwritten by every median/MAD evaluation.
    pub work: Vec<f32>,
    /// Origins of samples rejected or clamped at the current pixel.
    pub rejected: Vec<Origin>,
}

impl Rejection {
    /// Rejects outliers from `stack`. Clears and refills `scratch.rejected`.
    pub(crate) fn apply(&self, stack: &mut PixelStack, scratch: &mut ScratchBuffers) {
        scratch.rejected.clear();
        match *self {
            Rejection::None => {}
            Rejection::SigmaClip {
                low,
                high,
                max_iterations,
            } => sigma_clip(stack, low, high, max_iterations, scratch),
            Rejection::WinsorizedSigmaClip {
                low,
                high,
                max_iterations,
            } => winsorize(stack, low, high, max_iterations, scratch),
            Rejection::PercentileClip { low, high } => percentile_clip(stack, low, high, scratch),
        }
    }
}

/// Median and MAD-derived σ of `values`, computed on a copy in `work`.
fn robust_center(values: &[f32], work: &mut Vec<f32>) -> (f32, f32) {
    work.clear();
    work.extend_from_slice(values);
    let (median, mad) = median_and_mad_f32_mut(work);
    (median, mad_to_sigma(mad))
}

/// Iteratively partitions survivors of `[median − low·σ, median + high·σ]` to
/// the front, σ being the MAD-scaled deviation of the current survivors. Stops
/// when nothing changes, σ collapses to zero, fewer than three samples remain
/// or after `max_iterations`. An iteration that would clip everything is discarded.
fn sigma_clip(
    stack: &mut PixelStack,
    low: f32,
    high: f32,
    max_iterations: u32,
    scratch: &mut ScratchBuffers,
) {
    let full = stack.len();
    let mut len = full;

    for _ in 0..max_iterations {
        if len < 3 {
            break;
        }
        let (center, sigma) = robust_center(&stack.values[..len], &mut scratch.work);
        if sigma < f32::EPSILON {
            break;
        }
        let low_bound = low * sigma;
        let high_bound = high * sigma;

        let mut write = 0;
        for read in 0..len {
            let diff = stack.values[read] - center;
            let keep = if diff < 0.0 {
                -diff <= low_bound
            } else {
                diff <= high_bound
            };
            if keep {
                stack.swap(write, read);
                write += 1;
            }
        }
        if write == len || write == 0 {
            break;
        }
        len = write;
    }

    if len < full {
        stack.truncate_into(len, &mut scratch.rejected);
    }
}

/// Iteratively clamps samples to `[median − low·σ, median + high·σ]`, with σ
/// taken from the MAD of the current (already clamped) samples.
fn winsorize(
    stack: &mut PixelStack,
    low: f32,
    high: f32,
    max_iterations: u32,
    scratch: &mut ScratchBuffers,
) {
    let n = stack.len();
    if n < 3 {
        return;
    }
    scratch.values.clear();
    scratch.values.extend_from_slice(&stack.values);

    for _ in 0..max_iterations {
        let (center, sigma) = robust_center(&stack.values, &mut scratch.work);
        if sigma < f32::EPSILON {
            break;
        }
        let lo = center - low * sigma;
        let hi = center + high * sigma;

        let mut changed = false;
        for v in stack.values.iter_mut() {
            let clamped = v.clamp(lo, hi);
            if clamped != *v {
                *v = clamped;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for ((v, original), origin) in stack.values.iter().zip(&scratch.values).zip(&stack.origins) {
        if v != original {
            scratch.rejected.push(*origin);
        }
    }
}

/// Keeps the samples ranked between `low·n` and `high·n`; at least one survives.
fn percentile_clip(stack: &mut PixelStack, low: f32, high: f32, scratch: &mut ScratchBuffers) {
    let n = stack.len();
    if n == 0 {
        return;
    }
    stack.sort();

    let range = surviving_range(n, low, high);
    scratch.rejected.extend_from_slice(&stack.origins[..range.start]);
    scratch.rejected.extend_from_slice(&stack.origins[range.end..]);
    let count = range.len();
    stack.values.copy_within(range.clone(), 0);
    stack.origins.copy_within(range, 0);
    stack.values.truncate(count);
    stack.origins.truncate(count);
}

/// Half-open rank range kept by percentile clipping of `n` sorted samples.
fn surviving_range(n: usize, low: f32, high: f32) -> std::ops::Range<usize> {
    let start = ((low * n as f32) + RANK_EPS).floor() as usize;
    let end = (((high * n as f32) - RANK_EPS).ceil() as usize).min(n);
    if start >= end {
        let mid = n / 2;
        mid..mid + 1
    } else {
        start..end
    }
}
