//! Point-spread-function fits on the quadratic form of a linearized profile.
//!
//! A Gaussian satisfies `ln(I - B) = c0 + c1·u + c2·v + c3·u² + c4·uv + c5·v²`
//! and a Moffat with known β satisfies `(I - B)^(-1/β) = c0 + ... + c5·v²`.
//! Both are linear in the six coefficients, so one weighted least-squares
//! solve yields centre, amplitude, axis widths and orientation.

use common::Buffer2;
use glam::DVec2;

use super::config::PsfModel;
use crate::math::{Matrix, median_f32_mut, sigma_to_fwhm};

/// Pixels below this fraction of the peak height carry too little signal to fit.
const SIGNAL_FLOOR_FRACTION: f32 = 0.1;
/// Coefficient count of the quadratic form.
const TERMS: usize = 6;

/// Fitted profile of one star. Coordinates are image pixels with pixel `(x, y)`
/// centred at `(x + 0.5, y + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Psf {
    pub model: PsfModel,
    pub x: f64,
    pub y: f64,
    /// Peak height above background.
    pub amplitude: f64,
    pub background: f64,
    /// Major-axis width: Gaussian σ, or Moffat α.
    pub sigma_x: f64,
    /// Minor-axis width.
    pub sigma_y: f64,
    /// Major-axis angle in radians, in `(-π/2, π/2]`.
    pub theta: f64,
    pub fwhm_x: f64,
    pub fwhm_y: f64,
    /// `min(fwhm) / max(fwhm)` in `(0, 1]`.
    pub roundness: f64,
    /// Integrated flux above background.
    pub flux: f64,
}

impl Psf {
    #[inline]
    pub fn center(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    pub fn beta(&self) -> Option<f64> {
        match self.model {
            PsfModel::Gaussian => None,
            PsfModel::Moffat { beta } => Some(beta),
        }
    }
}

/// Why a candidate produced no PSF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitFailure {
    /// Fit window leaves the image.
    Border,
    /// Not enough pixels above the signal floor.
    TooFewPixels,
    /// Normal equations are singular.
    Singular,
    /// Quadratic form has no interior extremum of the right kind, or the
    /// profile is wider than the fit window.
    Diverged,
    /// Centre lands outside the image or far from the seed.
    OutOfBounds,
}

/// Fits `model` in the `(2r + 1)²` window around `peak`.
pub fn fit_psf(
    image: &Buffer2<f32>,
    peak: (usize, usize),
    radius: usize,
    model: PsfModel,
) -> Result<Psf, FitFailure> {
    let (px, py) = peak;
    if px < radius || py < radius || px + radius >= image.width() || py + radius >= image.height()
    {
        return Err(FitFailure::Border);
    }
    let x0 = px - radius;
    let y0 = py - radius;
    let side = 2 * radius + 1;

    let background = window_background(image, x0, y0, side);
    let height = image[(px, py)] - background;
    if height <= 0.0 {
        return Err(FitFailure::Diverged);
    }
    let floor = SIGNAL_FLOOR_FRACTION * height;

    let mut weight_sum = 0.0f64;
    let mut seed = DVec2::ZERO;
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            let signal = image[(x, y)] - background;
            if signal > floor {
                let w = signal as f64;
                weight_sum += w;
                seed += w * DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
            }
        }
    }
    if weight_sum <= 0.0 {
        return Err(FitFailure::TooFewPixels);
    }
    let seed = seed / weight_sum;

    let mut rows: Vec<f64> = Vec::with_capacity(side * side * TERMS);
    let mut rhs: Vec<f64> = Vec::with_capacity(side * side);
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            let signal = (image[(x, y)] - background) as f64;
            if signal <= floor as f64 {
                continue;
            }
            let (target, weight) = match model {
                PsfModel::Gaussian => (signal.ln(), signal),
                PsfModel::Moffat { beta } => {
                    (signal.powf(-1.0 / beta), signal.powf(1.0 / beta + 1.0))
                }
            };
            let u = x as f64 + 0.5 - seed.x;
            let v = y as f64 + 0.5 - seed.y;
            rows.extend([1.0, u, v, u * u, u * v, v * v].map(|t| t * weight));
            rhs.push(target * weight);
        }
    }
    if rhs.len() < TERMS {
        return Err(FitFailure::TooFewPixels);
    }

    let design = Matrix::from_vec(rhs.len(), TERMS, rows);
    let c = design.least_squares(&rhs).ok_or(FitFailure::Singular)?;
    let shape = QuadraticForm::from_coefficients(&c, model)?;

    if shape.widths.0 > radius as f64 {
        return Err(FitFailure::Diverged);
    }
    let center = seed + shape.offset;
    if shape.offset.x.abs() > radius as f64 || shape.offset.y.abs() > radius as f64 {
        return Err(FitFailure::OutOfBounds);
    }
    if center.x < 0.0
        || center.y < 0.0
        || center.x >= image.width() as f64
        || center.y >= image.height() as f64
    {
        return Err(FitFailure::OutOfBounds);
    }

    Ok(shape.into_psf(model, center, background as f64))
}

/// Quadratic form decomposed into centre offset, extremum value and principal axes.
struct QuadraticForm {
    offset: DVec2,
    amplitude: f64,
    /// Major and minor widths (σ or α).
    widths: (f64, f64),
    theta: f64,
}

impl QuadraticForm {
    fn from_coefficients(c: &[f64], model: PsfModel) -> Result<Self, FitFailure> {
        let (c1, c2, c3, c4, c5) = (c[1], c[2], c[3], c[4], c[5]);
        let denominator = 4.0 * c3 * c5 - c4 * c4;
        if denominator <= 0.0 {
            return Err(FitFailure::Diverged);
        }
        // Gaussian log-profiles curve down at the peak, Moffat transforms curve up.
        let curvature_ok = match model {
            PsfModel::Gaussian => c3 < 0.0,
            PsfModel::Moffat { .. } => c3 > 0.0,
        };
        if !curvature_ok {
            return Err(FitFailure::Diverged);
        }

        let u0 = (c4 * c2 - 2.0 * c5 * c1) / denominator;
        let v0 = (c4 * c1 - 2.0 * c3 * c2) / denominator;
        let extremum = c[0] + 0.5 * (c1 * u0 + c2 * v0);

        // Positive-definite matrix of the centred quadratic part.
        let (p, q, r, amplitude) = match model {
            PsfModel::Gaussian => (-2.0 * c3, -c4, -2.0 * c5, extremum.exp()),
            PsfModel::Moffat { beta } => {
                if extremum <= 0.0 {
                    return Err(FitFailure::Diverged);
                }
                (
                    c3 / extremum,
                    c4 / (2.0 * extremum),
                    c5 / extremum,
                    extremum.powf(-beta),
                )
            }
        };

        let mean = 0.5 * (p + r);
        let spread = (0.25 * (p - r) * (p - r) + q * q).sqrt();
        let small = mean - spread;
        let large = mean + spread;
        if small <= 0.0 || !amplitude.is_finite() {
            return Err(FitFailure::Diverged);
        }

        // For Gaussians the matrix is Σ⁻¹, so width = 1/√λ; for Moffat it is 1/α².
        let major = 1.0 / small.sqrt();
        let minor = 1.0 / large.sqrt();
        // Eigenvector of the larger eigenvalue lies at φ; the major axis is perpendicular.
        let phi = 0.5 * (2.0 * q).atan2(p - r);
        let mut theta = phi + std::f64::consts::FRAC_PI_2;
        if theta > std::f64::consts::FRAC_PI_2 {
            theta -= std::f64::consts::PI;
        }

        Ok(Self {
            offset: DVec2::new(u0, v0),
            amplitude,
            widths: (major, minor),
            theta,
        })
    }

    fn into_psf(self, model: PsfModel, center: DVec2, background: f64) -> Psf {
        let (sigma_x, sigma_y) = self.widths;
        let (fwhm_x, fwhm_y, flux) = match model {
            PsfModel::Gaussian => (
                sigma_to_fwhm(sigma_x),
                sigma_to_fwhm(sigma_y),
                2.0 * std::f64::consts::PI * self.amplitude * sigma_x * sigma_y,
            ),
            PsfModel::Moffat { beta } => {
                let factor = 2.0 * (2f64.powf(1.0 / beta) - 1.0).sqrt();
                (
                    factor * sigma_x,
                    factor * sigma_y,
                    std::f64::consts::PI * self.amplitude * sigma_x * sigma_y / (beta - 1.0),
                )
            }
        };

        Psf {
            model,
            x: center.x,
            y: center.y,
            amplitude: self.amplitude,
            background,
            sigma_x,
            sigma_y,
            theta: self.theta,
            fwhm_x,
            fwhm_y,
            roundness: fwhm_y / fwhm_x,
            flux,
        }
    }
}

/// Median of the window perimeter.
fn window_background(image: &Buffer2<f32>, x0: usize, y0: usize, side: usize) -> f32 {
    let mut ring = Vec::with_capacity(4 * side);
    for i in 0..side {
        ring.push(image[(x0 + i, y0)]);
        ring.push(image[(x0 + i, y0 + side - 1)]);
        if i > 0 && i + 1 < side {
            ring.push(image[(x0, y0 + i)]);
            ring.push(image[(x0 + side - 1, y0 + i)]);
        }
    }
    median_f32_mut(&mut ring)
}

/// Running sums of PSF shape parameters. Partial accumulators from parallel
/// workers are combined with [`PsfAccumulator::merge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PsfAccumulator {
    count: usize,
    fwhm_x: f64,
    fwhm_y: f64,
    sigma_x: f64,
    sigma_y: f64,
    roundness: f64,
}

/// Mean shape of all accepted stars in one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanPsf {
    pub model: PsfModel,
    pub count: usize,
    pub fwhm_x: f64,
    pub fwhm_y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub roundness: f64,
}

impl MeanPsf {
    /// Geometric mean of the two axes.
    pub fn fwhm(&self) -> f64 {
        (self.fwhm_x * self.fwhm_y).sqrt()
    }
}

impl PsfAccumulator {
    pub fn add(&mut self, psf: &Psf) {
        self.count += 1;
        self.fwhm_x += psf.fwhm_x;
        self.fwhm_y += psf.fwhm_y;
        self.sigma_x += psf.sigma_x;
        self.sigma_y += psf.sigma_y;
        self.roundness += psf.roundness;
    }

    pub fn merge(mut self, other: PsfAccumulator) -> PsfAccumulator {
        self.count += other.count;
        self.fwhm_x += other.fwhm_x;
        self.fwhm_y += other.fwhm_y;
        self.sigma_x += other.sigma_x;
        self.sigma_y += other.sigma_y;
        self.roundness += other.roundness;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(&self, model: PsfModel) -> Option<MeanPsf> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(MeanPsf {
            model,
            count: self.count,
            fwhm_x: self.fwhm_x / n,
            fwhm_y: self.fwhm_y / n,
            sigma_x: self.sigma_x / n,
            sigma_y: self.sigma_y / n,
            roundness: self.roundness / n,
        })
    }
}
