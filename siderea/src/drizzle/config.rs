//! Drizzle configuration.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// How a shrunken source pixel ("drop") is spread over the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DrizzleKernel {
    /// Projects all four drop corners and splits the drop by exact
    /// quadrilateral/pixel overlap. Correct under rotation and shear.
    #[default]
    Square,
    /// Axis-aligned square drop around the projected centre, sized to the
    /// local area scale. Cheaper; fine for small rotations.
    Turbo,
    /// The whole drop lands in the output pixel under its projected centre.
    Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrizzleConfig {
    /// Output resolution relative to the input, e.g. 2.0 doubles width and height.
    pub scale: f32,
    /// Drop side as a fraction of the source pixel side, in (0, 1].
    pub pixfrac: f32,
    pub kernel: DrizzleKernel,
    /// Value of output pixels without enough coverage.
    pub fill_value: f32,
    /// Output pixels whose weight is below `min_coverage × max_weight` get `fill_value`.
    pub min_coverage: f32,
}

impl Default for DrizzleConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            pixfrac: 0.8,
            kernel: DrizzleKernel::Square,
            fill_value: 0.0,
            min_coverage: 0.1,
        }
    }
}

impl DrizzleConfig {
    // ========== Presets ==========

    pub fn x2() -> Self {
        Self::default()
    }

    pub fn x1_5() -> Self {
        Self {
            scale: 1.5,
            ..Default::default()
        }
    }

    /// 3× output with slightly smaller drops.
    pub fn x3() -> Self {
        Self {
            scale: 3.0,
            pixfrac: 0.7,
            ..Default::default()
        }
    }

    // ========== Builders ==========

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_pixfrac(mut self, pixfrac: f32) -> Self {
        self.pixfrac = pixfrac;
        self
    }

    pub fn with_kernel(mut self, kernel: DrizzleKernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn with_min_coverage(mut self, min_coverage: f32) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    // ========== Validation ==========

    /// # Panics
    ///
    /// Panics on a non-positive scale, `pixfrac` outside (0, 1] or
    /// `min_coverage` outside [0, 1].
    pub fn validate(&self) {
        assert!(
            self.scale > 0.0 && self.scale.is_finite(),
            "scale must be positive, got {}",
            self.scale
        );
        assert!(
            self.pixfrac > 0.0 && self.pixfrac <= 1.0,
            "pixfrac must be in (0, 1], got {}",
            self.pixfrac
        );
        assert!(
            (0.0..=1.0).contains(&self.min_coverage),
            "min_coverage must be between 0.0 and 1.0, got {}",
            self.min_coverage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DrizzleConfig::default();
        assert_eq!(config.scale, 2.0);
        assert_eq!(config.pixfrac, 0.8);
        assert_eq!(config.kernel, DrizzleKernel::Square);
        config.validate();
    }

    #[test]
    fn test_presets_and_builders() {
        assert_eq!(DrizzleConfig::x1_5().scale, 1.5);
        let x3 = DrizzleConfig::x3();
        assert_eq!(x3.scale, 3.0);
        assert_eq!(x3.pixfrac, 0.7);

        let config = DrizzleConfig::x2()
            .with_scale(1.0)
            .with_pixfrac(1.0)
            .with_kernel(DrizzleKernel::Turbo)
            .with_fill_value(f32::NAN)
            .with_min_coverage(0.0);
        config.validate();
        assert_eq!(config.kernel, DrizzleKernel::Turbo);
        assert!(config.fill_value.is_nan());
    }

    #[test]
    fn test_yaml_config() {
        let config: DrizzleConfig =
            serde_yml::from_str("scale: 3.0\nkernel: point\n").expect("valid yaml");
        assert_eq!(config.scale, 3.0);
        assert_eq!(config.kernel, DrizzleKernel::Point);
        assert_eq!(config.pixfrac, 0.8);
        assert_eq!(DrizzleKernel::Turbo.to_string(), "turbo");
    }

    #[test]
    #[should_panic(expected = "pixfrac must be in (0, 1]")]
    fn test_validate_pixfrac_too_large() {
        DrizzleConfig::default().with_pixfrac(1.5).validate();
    }

    #[test]
    #[should_panic(expected = "pixfrac must be in (0, 1]")]
    fn test_validate_zero_pixfrac() {
        DrizzleConfig::default().with_pixfrac(0.0).validate();
    }

    #[test]
    #[should_panic(expected = "scale must be positive")]
    fn test_validate_scale() {
        DrizzleConfig::default().with_scale(-2.0).validate();
    }

    #[test]
    #[should_panic(expected = "min_coverage must be between")]
    fn test_validate_min_coverage() {
        DrizzleConfig::default().with_min_coverage(1.5).validate();
    }
}
