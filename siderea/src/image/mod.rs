//! Planar multi-channel images with typed samples.

pub mod raster;
mod sample;

use common::Buffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use raster::{RasterError, RasterImage, load_raster, read_raster, save_raster, write_raster};
pub use sample::{BitDepth, Sample};

/// Rec. 709 luma weights for RGB.
const REC709: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: usize,
    pub height: usize,
    /// 1 for grayscale, 3 for RGB.
    pub channels: usize,
}

impl ImageDimensions {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        assert!(channels > 0, "Channels must be positive");
        Self {
            width,
            height,
            channels,
        }
    }

    /// Samples in one channel plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// Samples across all planes.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.plane_len() * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Dense raster with contiguous, row-major channel planes.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    dimensions: ImageDimensions,
    data: Vec<T>,
}

/// Floating-point image; the output type of stacking and drizzle.
pub type Image32 = Image<f32>;

impl<T: Sample> Image<T> {
    /// Zero-filled image.
    pub fn new(dimensions: ImageDimensions) -> Self {
        Self {
            dimensions,
            data: vec![T::default(); dimensions.sample_count()],
        }
    }

    pub fn filled(dimensions: ImageDimensions, value: T) -> Self {
        Self {
            dimensions,
            data: vec![value; dimensions.sample_count()],
        }
    }

    /// Wraps planar data (all of channel 0, then channel 1, ...).
    pub fn from_planar(dimensions: ImageDimensions, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            dimensions.sample_count(),
            "Planar data length {} does not match {}",
            data.len(),
            dimensions
        );
        Self { dimensions, data }
    }

    /// Single-channel image from a row-major grid.
    pub fn from_buffer(buffer: Buffer2<T>) -> Self {
        let dimensions = ImageDimensions::new(buffer.width(), buffer.height(), 1);
        Self {
            dimensions,
            data: buffer.into_vec(),
        }
    }

    #[inline]
    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.dimensions.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.dimensions.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.dimensions.channels
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn plane(&self, channel: usize) -> &[T] {
        let len = self.dimensions.plane_len();
        &self.data[channel * len..(channel + 1) * len]
    }

    #[inline]
    pub fn plane_mut(&mut self, channel: usize) -> &mut [T] {
        let len = self.dimensions.plane_len();
        &mut self.data[channel * len..(channel + 1) * len]
    }

    #[inline]
    pub fn row(&self, channel: usize, y: usize) -> &[T] {
        let width = self.width();
        let start = y * width;
        &self.plane(channel)[start..start + width]
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize, channel: usize) -> T {
        self.plane(channel)[y * self.width() + x]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, channel: usize, value: T) {
        let width = self.width();
        self.plane_mut(channel)[y * width + x] = value;
    }

    /// Converts every sample through the normalized float range.
    pub fn convert<U: Sample>(&self) -> Image<U> {
        Image {
            dimensions: self.dimensions,
            data: self
                .data
                .par_iter()
                .map(|&v| U::from_f32(v.to_f32()))
                .collect(),
        }
    }

    pub fn to_f32(&self) -> Image32 {
        self.convert()
    }

    /// Single luminance plane: the lone channel, Rec. 709 luma for three
    /// channels, the channel mean otherwise.
    pub fn luminance(&self) -> Buffer2<f32> {
        let width = self.width();
        let height = self.height();
        let channels = self.channels();
        let mut out = vec![0.0f32; width * height];

        out.par_iter_mut().enumerate().for_each(|(i, value)| {
            *value = match channels {
                1 => self.data[i].to_f32(),
                3 => (0..3)
                    .map(|c| REC709[c] * self.plane(c)[i].to_f32())
                    .sum(),
                _ => {
                    (0..channels).map(|c| self.plane(c)[i].to_f32()).sum::<f32>() / channels as f32
                }
            };
        });

        Buffer2::new(width, height, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_layout() {
        let dims = ImageDimensions::new(2, 2, 2);
        let image = Image::from_planar(dims, vec![1u8, 2, 3, 4, 10, 20, 30, 40]);
        assert_eq!(image.plane(0), &[1, 2, 3, 4]);
        assert_eq!(image.plane(1), &[10, 20, 30, 40]);
        assert_eq!(image.pixel(1, 1, 1), 40);
        assert_eq!(image.row(1, 0), &[10, 20]);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_from_planar_rejects_wrong_length() {
        Image::from_planar(ImageDimensions::new(2, 2, 1), vec![0.0f32; 3]);
    }

    #[test]
    fn test_convert_u16_to_f32() {
        let image = Image::from_planar(ImageDimensions::new(2, 1, 1), vec![0u16, 65535]);
        let float = image.to_f32();
        assert_eq!(float.data(), &[0.0, 1.0]);
        let back: Image<u16> = float.convert();
        assert_eq!(back, image);
    }

    #[test]
    fn test_luminance_of_rgb_uses_luma_weights() {
        let dims = ImageDimensions::new(1, 1, 3);
        let image = Image::from_planar(dims, vec![1.0f32, 0.0, 0.0]);
        let lum = image.luminance();
        assert!((lum[(0, 0)] - 0.2126).abs() < 1e-6);

        let white = Image::filled(dims, 1.0f32);
        assert!((white.luminance()[(0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_luminance_of_two_channels_is_mean() {
        let image = Image::from_planar(ImageDimensions::new(1, 1, 2), vec![0.2f32, 0.6]);
        assert!((image.luminance()[(0, 0)] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_empty_dimensions() {
        let dims = ImageDimensions::new(0, 5, 1);
        assert!(dims.is_empty());
        assert_eq!(Image::<f32>::new(dims).data().len(), 0);
        assert_eq!(ImageDimensions::new(4, 3, 3).to_string(), "4x3x3");
    }
}
