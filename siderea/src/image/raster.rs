//! Minimal planar raster format for weight maps and intermediate frames.
//!
//! Layout (little-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SDRS"
//! 4       1     version (1)
//! 5       1     bits per sample: 8, 16 or 32 (IEEE float)
//! 6       1     compressed flag (0 or 1)
//! 7       1     reserved
//! 8       4     height (rows)
//! 12      4     width (columns)
//! 16      4     channels
//! 20      ...   planar pixel data
//! ```
//!
//! Uncompressed data is every channel plane back to back, rows top to bottom.
//! Compressed data stores each plane as a `u32` byte count followed by the
//! PackBits-encoded bytes of that plane.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{BitDepth, Image, Image32, ImageDimensions, Sample};

pub const MAGIC: [u8; 4] = *b"SDRS";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 20;

/// Longest run or literal block a PackBits control byte can describe.
const PACKBITS_MAX_BLOCK: usize = 128;

/// Most output bytes one encoded byte can produce: a two-byte run of 128.
const PACKBITS_MAX_EXPANSION: usize = PACKBITS_MAX_BLOCK / 2;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("Failed to access raster file {path}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Raster I/O error")]
    Io(#[from] io::Error),

    #[error("Not a raster file: magic bytes {found:?}")]
    BadMagic { found: [u8; 4] },

    #[error("Unsupported raster version {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported raster bit depth {0}")]
    UnsupportedBitDepth(u8),

    #[error("Raster declares zero channels")]
    ZeroChannels,

    #[error("Raster truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Corrupt run-length data in channel {channel}")]
    CorruptRle { channel: usize },

    #[error("Expected a {expected} raster, found {found}")]
    SampleTypeMismatch { expected: BitDepth, found: BitDepth },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterHeader {
    pub dimensions: ImageDimensions,
    pub bit_depth: BitDepth,
    pub compressed: bool,
}

impl RasterHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = VERSION;
        out[5] = self.bit_depth.bits();
        out[6] = self.compressed as u8;
        out[8..12].copy_from_slice(&(self.dimensions.height as u32).to_le_bytes());
        out[12..16].copy_from_slice(&(self.dimensions.width as u32).to_le_bytes());
        out[16..20].copy_from_slice(&(self.dimensions.channels as u32).to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RasterError> {
        if bytes.len() < HEADER_LEN {
            return Err(RasterError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(RasterError::BadMagic { found: magic });
        }
        if bytes[4] != VERSION {
            return Err(RasterError::UnsupportedVersion(bytes[4]));
        }
        let bit_depth =
            BitDepth::from_bits(bytes[5]).ok_or(RasterError::UnsupportedBitDepth(bytes[5]))?;

        let read_u32 = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
        };
        let height = read_u32(8);
        let width = read_u32(12);
        let channels = read_u32(16);
        if channels == 0 {
            return Err(RasterError::ZeroChannels);
        }

        let header = Self {
            dimensions: ImageDimensions::new(width, height, channels),
            bit_depth,
            compressed: bytes[6] != 0,
        };
        if header.checked_body_bytes().is_none() {
            return Err(RasterError::Truncated {
                expected: usize::MAX,
                found: bytes.len(),
            });
        }
        Ok(header)
    }

    /// Bytes of one uncompressed channel plane. Cannot overflow for a decoded header.
    pub fn plane_bytes(&self) -> usize {
        self.dimensions.plane_len() * self.bit_depth.bytes_per_sample()
    }

    /// Bytes of all uncompressed planes. Cannot overflow for a decoded header.
    pub fn body_bytes(&self) -> usize {
        self.plane_bytes() * self.dimensions.channels
    }

    fn checked_body_bytes(&self) -> Option<usize> {
        let dims = self.dimensions;
        dims.width
            .checked_mul(dims.height)?
            .checked_mul(self.bit_depth.bytes_per_sample())?
            .checked_mul(dims.channels)
    }
}

/// A decoded raster whose sample type is only known at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterImage {
    U8(Image<u8>),
    U16(Image<u16>),
    F32(Image<f32>),
}

impl RasterImage {
    pub fn dimensions(&self) -> ImageDimensions {
        match self {
            RasterImage::U8(image) => image.dimensions(),
            RasterImage::U16(image) => image.dimensions(),
            RasterImage::F32(image) => image.dimensions(),
        }
    }

    pub fn bit_depth(&self) -> BitDepth {
        match self {
            RasterImage::U8(_) => BitDepth::U8,
            RasterImage::U16(_) => BitDepth::U16,
            RasterImage::F32(_) => BitDepth::F32,
        }
    }

    pub fn to_f32(&self) -> Image32 {
        match self {
            RasterImage::U8(image) => image.to_f32(),
            RasterImage::U16(image) => image.to_f32(),
            RasterImage::F32(image) => image.clone(),
        }
    }

    /// Unwraps an 8-bit raster such as a weight map.
    pub fn into_u8(self) -> Result<Image<u8>, RasterError> {
        match self {
            RasterImage::U8(image) => Ok(image),
            other => Err(RasterError::SampleTypeMismatch {
                expected: BitDepth::U8,
                found: other.bit_depth(),
            }),
        }
    }
}

pub fn write_raster<T: Sample, W: Write>(
    image: &Image<T>,
    compressed: bool,
    mut writer: W,
) -> io::Result<()> {
    let header = RasterHeader {
        dimensions: image.dimensions(),
        bit_depth: T::BIT_DEPTH,
        compressed,
    };
    writer.write_all(&header.encode())?;

    let mut encoded = Vec::new();
    for channel in 0..image.channels() {
        let plane: Vec<T> = image
            .plane(channel)
            .iter()
            .map(|v| v.to_le_sample())
            .collect();
        let bytes: &[u8] = bytemuck::cast_slice(&plane);
        if compressed {
            encoded.clear();
            packbits_encode(bytes, &mut encoded);
            writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
            writer.write_all(&encoded)?;
        } else {
            writer.write_all(bytes)?;
        }
    }
    writer.flush()
}

pub fn read_raster<R: Read>(mut reader: R) -> Result<RasterImage, RasterError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_raster(&bytes)
}

/// Decodes a complete raster held in memory.
pub fn decode_raster(bytes: &[u8]) -> Result<RasterImage, RasterError> {
    let header = RasterHeader::decode(bytes)?;
    let body = &bytes[HEADER_LEN..];
    Ok(match header.bit_depth {
        BitDepth::U8 => RasterImage::U8(decode_planes(&header, body)?),
        BitDepth::U16 => RasterImage::U16(decode_planes(&header, body)?),
        BitDepth::F32 => RasterImage::F32(decode_planes(&header, body)?),
    })
}

pub fn save_raster<T: Sample>(
    path: impl AsRef<Path>,
    image: &Image<T>,
    compressed: bool,
) -> Result<(), RasterError> {
    let path = path.as_ref();
    let file_error = |source| RasterError::File {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(file_error)?;
    write_raster(image, compressed, BufWriter::new(file)).map_err(file_error)
}

pub fn load_raster(path: impl AsRef<Path>) -> Result<RasterImage, RasterError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| RasterError::File {
        path: path.to_path_buf(),
        source,
    })?;
    read_raster(BufReader::new(file))
}

/// Validates body sizes against the header before allocating the image.
fn decode_planes<T: Sample>(header: &RasterHeader, body: &[u8]) -> Result<Image<T>, RasterError> {
    let dims = header.dimensions;
    let plane_bytes = header.plane_bytes();

    let mut image = if !header.compressed {
        let expected = header.body_bytes();
        if body.len() < expected {
            return Err(RasterError::Truncated {
                expected: HEADER_LEN.saturating_add(expected),
                found: HEADER_LEN + body.len(),
            });
        }
        let mut image = Image::<T>::new(dims);
        let target: &mut [u8] = bytemuck::cast_slice_mut(image.data_mut());
        target.copy_from_slice(&body[..expected]);
        image
    } else {
        let planes = compressed_planes(body, dims.channels, plane_bytes)?;
        let mut image = Image::<T>::new(dims);
        for (channel, encoded) in planes.into_iter().enumerate() {
            let target: &mut [u8] = bytemuck::cast_slice_mut(image.plane_mut(channel));
            if !packbits_decode(encoded, target) {
                return Err(RasterError::CorruptRle { channel });
            }
        }
        image
    };

    for v in image.data_mut() {
        *v = v.from_le_sample();
    }
    Ok(image)
}

/// Splits a compressed body into its per-channel segments. A segment too
/// short to expand to `plane_bytes` is rejected.
fn compressed_planes(
    body: &[u8],
    channels: usize,
    plane_bytes: usize,
) -> Result<Vec<&[u8]>, RasterError> {
    let mut planes = Vec::with_capacity(channels.min(body.len() / 4));
    let mut cursor = 0usize;
    for channel in 0..channels {
        let Some(len_bytes) = body.get(cursor..cursor + 4) else {
            return Err(RasterError::CorruptRle { channel });
        };
        let len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        cursor += 4;
        let encoded = cursor
            .checked_add(len)
            .and_then(|end| body.get(cursor..end))
            .ok_or(RasterError::CorruptRle { channel })?;
        if len.saturating_mul(PACKBITS_MAX_EXPANSION) < plane_bytes {
            return Err(RasterError::CorruptRle { channel });
        }
        cursor += len;
        planes.push(encoded);
    }
    Ok(planes)
}

/// PackBits: a control byte `n` in `0..=127` precedes `n + 1` literal bytes;
/// `n` in `129..=255` repeats the next byte `257 - n` times.
pub(crate) fn packbits_encode(input: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < input.len() {
        let run = run_length(&input[i..]);
        if run >= 3 {
            out.push((257 - run) as u8);
            out.push(input[i]);
            i += run;
            continue;
        }

        let start = i;
        while i < input.len() && i - start < PACKBITS_MAX_BLOCK && run_length(&input[i..]) < 3 {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&input[start..i]);
    }
}

/// Decodes into `out`, which must be filled exactly. Returns false on malformed input.
pub(crate) fn packbits_decode(input: &[u8], out: &mut [u8]) -> bool {
    let mut src = 0;
    let mut dst = 0;
    while src < input.len() {
        let control = input[src];
        src += 1;
        match control {
            0..=127 => {
                let count = control as usize + 1;
                let (Some(literal), Some(target)) =
                    (input.get(src..src + count), out.get_mut(dst..dst + count))
                else {
                    return false;
                };
                target.copy_from_slice(literal);
                src += count;
                dst += count;
            }
            128 => {}
            _ => {
                let count = 257 - control as usize;
                let (Some(&byte), Some(target)) = (input.get(src), out.get_mut(dst..dst + count))
                else {
                    return false;
                };
                target.fill(byte);
                src += 1;
                dst += count;
            }
        }
    }
    dst == out.len()
}

fn run_length(bytes: &[u8]) -> usize {
    let first = bytes[0];
    bytes
        .iter()
        .take(PACKBITS_MAX_BLOCK)
        .take_while(|&&b| b == first)
        .count()
}
