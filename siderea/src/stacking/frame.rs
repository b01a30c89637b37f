//! Row-range access to input frames.
//!
//! A frame is opened once per run and then shared read-only between worker
//! threads; each band only reads the rows it needs.

use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::image::raster::{HEADER_LEN, RasterHeader, decode_raster};
use crate::image::{BitDepth, Image, Image32, ImageDimensions, Sample};

use super::error::FrameError;

/// Read-only frame whose rows are fetched on demand as `f32`.
pub trait FrameReader: Send + Sync {
    fn dimensions(&self) -> ImageDimensions;

    /// Writes rows `rows` of `channel` into `out`, which holds exactly
    /// `rows.len() * width` samples.
    fn read_rows(
        &self,
        channel: usize,
        rows: Range<usize>,
        out: &mut [f32],
    ) -> Result<(), FrameError>;
}

/// Opens frames by path.
pub trait FrameOpener: Sync {
    type Reader: FrameReader;

    fn open(&self, path: &Path) -> Result<Self::Reader, FrameError>;
}

impl<F, R> FrameOpener for F
where
    F: Fn(&Path) -> Result<R, FrameError> + Sync,
    R: FrameReader,
{
    type Reader = R;

    fn open(&self, path: &Path) -> Result<R, FrameError> {
        self(path)
    }
}

/// Reads every channel of `reader` into memory.
pub fn read_frame(reader: &impl FrameReader) -> Result<Image32, FrameError> {
    let dims = reader.dimensions();
    let mut image = Image32::new(dims);
    for channel in 0..dims.channels {
        reader.read_rows(channel, 0..dims.height, image.plane_mut(channel))?;
    }
    Ok(image)
}

fn check_range(
    dims: ImageDimensions,
    channel: usize,
    rows: &Range<usize>,
    out: &[f32],
) -> Result<(), FrameError> {
    if channel >= dims.channels {
        return Err(FrameError::ChannelOutOfRange {
            channel,
            channels: dims.channels,
        });
    }
    if rows.start > rows.end || rows.end > dims.height {
        return Err(FrameError::RowsOutOfRange {
            start: rows.start,
            end: rows.end,
            height: dims.height,
        });
    }
    assert_eq!(
        out.len(),
        rows.len() * dims.width,
        "Output buffer does not match the requested rows"
    );
    Ok(())
}

impl<T: Sample> FrameReader for Image<T> {
    fn dimensions(&self) -> ImageDimensions {
        Image::dimensions(self)
    }

    fn read_rows(
        &self,
        channel: usize,
        rows: Range<usize>,
        out: &mut [f32],
    ) -> Result<(), FrameError> {
        let dims = Image::dimensions(self);
        check_range(dims, channel, &rows, out)?;
        let plane = self.plane(channel);
        let src = &plane[rows.start * dims.width..rows.end * dims.width];
        for (o, s) in out.iter_mut().zip(src) {
            *o = s.to_f32();
        }
        Ok(())
    }
}

impl<R: FrameReader + ?Sized> FrameReader for &R {
    fn dimensions(&self) -> ImageDimensions {
        (**self).dimensions()
    }

    fn read_rows(
        &self,
        channel: usize,
        rows: Range<usize>,
        out: &mut [f32],
    ) -> Result<(), FrameError> {
        (**self).read_rows(channel, rows, out)
    }
}

#[derive(Debug)]
enum Storage {
    /// Uncompressed file: samples are decoded straight from the mapping.
    Mapped(Mmap),
    /// PackBits-compressed file, decoded once at open.
    Decoded(Image32),
}

/// A raster file opened for stacking.
#[derive(Debug)]
pub struct RasterFile {
    path: PathBuf,
    header: RasterHeader,
    storage: Storage,
}

impl RasterFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| FrameError::Open {
            path: path.clone(),
            source,
        })?;
        // SAFETY: frames are not modified while a run holds them open.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| FrameError::Map {
                path: path.clone(),
                source,
            })?
        };
        let decode_error = |source| FrameError::Decode {
            path: path.clone(),
            source,
        };
        let header = RasterHeader::decode(&mmap).map_err(decode_error)?;

        let storage = if header.compressed {
            Storage::Decoded(decode_raster(&mmap).map_err(decode_error)?.to_f32())
        } else {
            let expected = HEADER_LEN.saturating_add(header.body_bytes());
            if mmap.len() < expected {
                return Err(decode_error(crate::image::RasterError::Truncated {
                    expected,
                    found: mmap.len(),
                }));
            }
            Storage::Mapped(mmap)
        };

        tracing::debug!(
            path = %path.display(),
            dimensions = %header.dimensions,
            bit_depth = %header.bit_depth,
            compressed = header.compressed,
            "Opened raster frame"
        );

        Ok(Self {
            path,
            header,
            storage,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.header.bit_depth
    }
}

impl FrameReader for RasterFile {
    fn dimensions(&self) -> ImageDimensions {
        self.header.dimensions
    }

    fn read_rows(
        &self,
        channel: usize,
        rows: Range<usize>,
        out: &mut [f32],
    ) -> Result<(), FrameError> {
        let dims = self.header.dimensions;
        check_range(dims, channel, &rows, out)?;

        let mmap = match &self.storage {
            Storage::Decoded(image) => return image.read_rows(channel, rows, out),
            Storage::Mapped(mmap) => mmap,
        };

        let bytes_per_sample = self.header.bit_depth.bytes_per_sample();
        let start = HEADER_LEN
            + channel * self.header.plane_bytes()
            + rows.start * dims.width * bytes_per_sample;
        let bytes = &mmap[start..start + out.len() * bytes_per_sample];

        match self.header.bit_depth {
            BitDepth::U8 => {
                for (o, &b) in out.iter_mut().zip(bytes) {
                    *o = b.to_f32();
                }
            }
            BitDepth::U16 => {
                for (o, b) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                    *o = u16::from_le_bytes([b[0], b[1]]).to_f32();
                }
            }
            BitDepth::F32 => {
                for (o, b) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                    *o = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                }
            }
        }
        Ok(())
    }
}

/// Opens paths as [`RasterFile`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterOpener;

impl FrameOpener for RasterOpener {
    type Reader = RasterFile;

    fn open(&self, path: &Path) -> Result<RasterFile, FrameError> {
        RasterFile::open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::save_raster;

    fn ramp(dims: ImageDimensions) -> Image<u16> {
        let data = (0..dims.sample_count())
            .map(|i| (i * 97 % 65536) as u16)
            .collect();
        Image::from_planar(dims, data)
    }

    fn read_all(reader: &impl FrameReader, channel: usize) -> Vec<f32> {
        let dims = reader.dimensions();
        let mut out = vec![0.0; dims.plane_len()];
        reader
            .read_rows(channel, 0..dims.height, &mut out)
            .expect("read");
        out
    }

    #[test]
    fn test_image_reader_converts_rows() {
        let image = ramp(ImageDimensions::new(5, 4, 2));
        let mut out = vec![0.0; 10];
        image.read_rows(1, 1..3, &mut out).expect("read");
        let expected: Vec<f32> = image.plane(1)[5..15].iter().map(|v| v.to_f32()).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_out_of_range_requests_fail() {
        let image = ramp(ImageDimensions::new(5, 4, 1));
        let mut out = vec![0.0; 5];
        assert!(matches!(
            image.read_rows(1, 0..1, &mut out),
            Err(FrameError::ChannelOutOfRange {
                channel: 1,
                channels: 1
            })
        ));
        assert!(matches!(
            image.read_rows(0, 4..5, &mut out),
            Err(FrameError::RowsOutOfRange { height: 4, .. })
        ));
    }

    #[test]
    fn test_raster_file_matches_in_memory_frame() {
        let dir = tempdir();
        let image = ramp(ImageDimensions::new(7, 6, 3));
        for compressed in [false, true] {
            let path = dir.join(format!("frame_{compressed}.sdr"));
            save_raster(&path, &image, compressed).expect("save");
            let file = RasterOpener.open(&path).expect("open");
            assert_eq!(file.dimensions(), image.dimensions());
            assert_eq!(file.bit_depth(), BitDepth::U16);
            for channel in 0..3 {
                assert_eq!(read_all(&file, channel), read_all(&image, channel));
            }
            let mut band = vec![0.0; 14];
            file.read_rows(2, 3..5, &mut band).expect("read");
            assert_eq!(band, read_all(&image, 2)[21..35]);
        }
    }

    #[test]
    fn test_f32_raster_is_read_verbatim() {
        let dir = tempdir();
        let dims = ImageDimensions::new(3, 2, 1);
        let image = Image32::from_planar(dims, vec![0.0, -1.5, 2.25, 1e-7, 0.5, 7.0]);
        let path = dir.join("float.sdr");
        save_raster(&path, &image, false).expect("save");
        let file = RasterFile::open(&path).expect("open");
        assert_eq!(read_all(&file, 0), image.plane(0));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = RasterFile::open("/nonexistent/frame.sdr").unwrap_err();
        assert!(matches!(err, FrameError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/frame.sdr"));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempdir();
        let path = dir.join("short.sdr");
        let image = ramp(ImageDimensions::new(8, 8, 1));
        save_raster(&path, &image, false).expect("save");
        let bytes = std::fs::read(&path).expect("read back");
        std::fs::write(&path, &bytes[..bytes.len() - 10]).expect("truncate");
        assert!(matches!(
            RasterFile::open(&path),
            Err(FrameError::Decode { .. })
        ));
    }

    #[test]
    fn test_read_frame_loads_all_channels() {
        let image = ramp(ImageDimensions::new(4, 3, 2));
        let loaded = read_frame(&image).expect("read");
        assert_eq!(loaded, image.to_f32());
    }

    #[test]
    fn test_closure_opener() {
        let image = ramp(ImageDimensions::new(2, 2, 1));
        let opener = |_: &Path| -> Result<Image<u16>, FrameError> { Ok(image.clone()) };
        let reader = opener.open(Path::new("memory")).expect("open");
        assert_eq!(reader.dimensions(), image.dimensions());
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "siderea_frame_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }
}
