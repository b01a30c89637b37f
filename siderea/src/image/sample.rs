use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Storage depth of a sample type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum BitDepth {
    #[strum(serialize = "8-bit")]
    U8,
    #[strum(serialize = "16-bit")]
    U16,
    #[strum(serialize = "32-bit float")]
    F32,
}

impl BitDepth {
    /// Bits per sample as stored in raster headers.
    pub fn bits(self) -> u8 {
        match self {
            BitDepth::U8 => 8,
            BitDepth::U16 => 16,
            BitDepth::F32 => 32,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(BitDepth::U8),
            16 => Some(BitDepth::U16),
            32 => Some(BitDepth::F32),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits() as usize / 8
    }
}

/// Pixel sample type with an exact mapping to the normalized float range.
///
/// Integer samples cover `[0, MAX]` and map to `[0.0, 1.0]` by division by `MAX`.
/// Conversion back rounds to nearest and saturates.
pub trait Sample:
    bytemuck::Pod + Default + PartialOrd + Debug + Send + Sync + 'static
{
    const BIT_DEPTH: BitDepth;

    fn to_f32(self) -> f32;

    fn from_f32(value: f32) -> Self;

    /// Byte-swaps from host order to little-endian (no-op on little-endian hosts).
    fn to_le_sample(self) -> Self;

    fn from_le_sample(self) -> Self;
}

impl Sample for u8 {
    const BIT_DEPTH: BitDepth = BitDepth::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        (value * 255.0).round().clamp(0.0, 255.0) as u8
    }

    #[inline]
    fn to_le_sample(self) -> Self {
        self
    }

    #[inline]
    fn from_le_sample(self) -> Self {
        self
    }
}

impl Sample for u16 {
    const BIT_DEPTH: BitDepth = BitDepth::U16;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 65535.0
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        (value * 65535.0).round().clamp(0.0, 65535.0) as u16
    }

    #[inline]
    fn to_le_sample(self) -> Self {
        u16::to_le(self)
    }

    #[inline]
    fn from_le_sample(self) -> Self {
        u16::from_le(self)
    }
}

impl Sample for f32 {
    const BIT_DEPTH: BitDepth = BitDepth::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_le_sample(self) -> Self {
        f32::from_bits(self.to_bits().to_le())
    }

    #[inline]
    fn from_le_sample(self) -> Self {
        f32::from_bits(u32::from_le(self.to_bits()))
    }
}
