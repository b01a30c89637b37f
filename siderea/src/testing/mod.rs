//! Synthetic data and helpers shared by unit tests.

#![allow(dead_code)]

use std::sync::Mutex;

use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::image::{Image32, ImageDimensions};
use crate::progress::ProgressObserver;
use crate::star_detection::Star;

/// Initialize tracing for tests. Safe to call repeatedly; honours `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Records every notification for later assertions.
#[derive(Default)]
pub struct Recorder {
    pub progress: Mutex<Vec<f32>>,
    pub messages: Mutex<Vec<String>>,
}

impl ProgressObserver for Recorder {
    fn on_progress(&self, fraction: f32) {
        self.progress.lock().unwrap().push(fraction);
    }

    fn on_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last_progress(&self) -> Option<f32> {
        self.progress.lock().unwrap().last().copied()
    }
}

/// Gaussian star rendered into a synthetic frame.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticStar {
    pub pos: DVec2,
    pub amplitude: f32,
    pub sigma_x: f64,
    pub sigma_y: f64,
}

impl SyntheticStar {
    pub fn round(x: f64, y: f64, amplitude: f32, sigma: f64) -> Self {
        Self {
            pos: DVec2::new(x, y),
            amplitude,
            sigma_x: sigma,
            sigma_y: sigma,
        }
    }
}

/// Renders stars on a flat background. Pixel `(x, y)` is sampled at its centre
/// `(x + 0.5, y + 0.5)`. `noise_sigma > 0` adds seeded Gaussian noise.
pub fn render_star_field(
    width: usize,
    height: usize,
    stars: &[SyntheticStar],
    background: f32,
    noise_sigma: f32,
    seed: u64,
) -> Image32 {
    let mut image = Image32::filled(ImageDimensions::new(width, height, 1), background);
    let mut rng = StdRng::seed_from_u64(seed);

    for y in 0..height {
        for x in 0..width {
            let px = x as f64 + 0.5;
            let py = y as f64 + 0.5;
            let mut value = background;
            for star in stars {
                let dx = (px - star.pos.x) / star.sigma_x;
                let dy = (py - star.pos.y) / star.sigma_y;
                let r2 = dx * dx + dy * dy;
                if r2 < 50.0 {
                    value += star.amplitude * (-0.5 * r2).exp() as f32;
                }
            }
            if noise_sigma > 0.0 {
                value += noise_sigma * gaussian(&mut rng);
            }
            image.set_pixel(x, y, 0, value);
        }
    }
    image
}

/// Standard normal deviate via Box-Muller.
pub fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

/// Random positions at least `min_separation` apart, inside `margin` of the border.
pub fn random_positions(
    count: usize,
    width: f64,
    height: f64,
    margin: f64,
    min_separation: f64,
    seed: u64,
) -> Vec<DVec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions: Vec<DVec2> = Vec::with_capacity(count);
    let mut attempts = 0;
    while positions.len() < count && attempts < count * 1000 {
        attempts += 1;
        let p = DVec2::new(
            rng.random_range(margin..width - margin),
            rng.random_range(margin..height - margin),
        );
        if positions
            .iter()
            .all(|q| q.distance(p) >= min_separation)
        {
            positions.push(p);
        }
    }
    positions
}

/// Star records with strictly decreasing luminance in list order.
pub fn stars_at(positions: &[DVec2]) -> Vec<Star> {
    positions
        .iter()
        .enumerate()
        .map(|(i, p)| Star {
            x: p.x,
            y: p.y,
            radius_x: 2.0,
            radius_y: 2.0,
            luminance: 1000.0 - i as f64,
        })
        .collect()
}
