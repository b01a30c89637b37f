//! Error types for stacking and drizzle runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::image::{ImageDimensions, RasterError};
use crate::progress::Cancelled;

/// Failure to open or read one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to open frame '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to memory-map frame '{path}': {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode frame '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: RasterError,
    },

    #[error("Rows {start}..{end} outside frame of height {height}")]
    RowsOutOfRange {
        start: usize,
        end: usize,
        height: usize,
    },

    #[error("Channel {channel} outside frame with {channels} channels")]
    ChannelOutOfRange { channel: usize, channels: usize },
}

/// Why a frame's homography cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HomographyIssue {
    #[error("{homographies} homographies given for {frames} frames")]
    CountMismatch { frames: usize, homographies: usize },

    #[error("homography of frame {index} is not invertible")]
    Singular { index: usize },
}

/// Errors that abort a whole stacking or drizzle run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No frames provided for stacking")]
    NoFrames,

    #[error("None of the {attempted} frames could be opened")]
    NoUsableFrames { attempted: usize },

    #[error("Dimension mismatch for frame {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: usize,
        expected: ImageDimensions,
        actual: ImageDimensions,
    },

    #[error("Invalid homography: {0}")]
    InvalidHomography(HomographyIssue),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("Failed to read frame {index}: {source}")]
    FrameRead {
        index: usize,
        #[source]
        source: FrameError,
    },
}
