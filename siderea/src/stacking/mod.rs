//! Multi-frame pixel stacking.
//!
//! Every output pixel gathers one sample per frame through that frame's
//! inverse homography, normalizes it towards the reference frame, rejects
//! outliers and integrates the survivors. Output rows are processed in
//! parallel bands; each band reads only the source rows it needs.

mod config;
mod error;
mod estimators;
mod frame;
mod integration;
mod rejection;
mod stack;


pub use config::{Estimator, Integration, Interpolation, Normalization, Rejection, StackConfig};
pub use error::{Error, FrameError, HomographyIssue};
pub use estimators::{ScaleEstimators, compute_scale_estimators};
pub use frame::{FrameOpener, FrameReader, RasterFile, RasterOpener, read_frame};
pub use stack::{StackReport, StackResult, stack_frames, stack_images};
