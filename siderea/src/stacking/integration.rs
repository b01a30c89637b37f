//! Combining the surviving samples of a pixel stack.

use crate::math::{mean_f32, median_f32_mut};

use super::config::Integration;

impl Integration {
    /// Combines `values` into one sample. May reorder `values`; an empty stack yields 0.
    pub(crate) fn integrate(&self, values: &mut [f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Integration::Average => mean_f32(values),
            Integration::Median => median_f32_mut(values),
            Integration::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
            Integration::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_methods() {
        let values = [0.4, 0.1, 0.9, 0.2];
        let run = |method: Integration| method.integrate(&mut values.clone());
        assert!((run(Integration::Average) - 0.4).abs() < 1e-6);
        assert!((run(Integration::Median) - 0.3).abs() < 1e-6);
        assert_eq!(run(Integration::Min), 0.1);
        assert_eq!(run(Integration::Max), 0.9);
    }

    #[test]
    fn test_single_and_empty_stacks() {
        for method in [
            Integration::Average,
            Integration::Median,
            Integration::Min,
            Integration::Max,
        ] {
            assert_eq!(method.integrate(&mut [0.625]), 0.625, "{method}");
            assert_eq!(method.integrate(&mut []), 0.0, "{method}");
        }
    }
}
