//! # Video-Clipper
//!
//! Cut training clips out of raw recordings.
//!
//! Two pipelines share one set of frame stages:
//!
//! - **split** walks a recording and starts a new clip at every black frame,
//!   decimating content frames to a lower rate.
//! - **export** cuts a labeled `[start, end)` range out of a video, optionally
//!   blacking out rectangular regions, and files it under
//!   `{root}/{fps}fps/{action}/`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use video_clipper::{
//!     config::Config,
//!     pipeline::{split_file, SplitJob},
//!     video::FfmpegEncoder,
//! };
//!
//! # fn main() -> video_clipper::Result<()> {
//! let config = Config::default();
//! let encoder = FfmpegEncoder::new(config.encoder.clone());
//!
//! let job = SplitJob::from_config("recording.mp4", &config);
//! let report = split_file(&job, &config, &encoder)?;
//! println!("wrote {} clips", report.clips.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - Frame sources, detection, decimation, masking and encoding
//! - [`pipeline`] - The split and export drivers plus the job runner
//! - [`config`] - Configuration management
//!
//! ## Plugging in an Encoder
//!
//! Drivers write through the [`Encoder`](video::Encoder) trait, so output can
//! go somewhere other than ffmpeg:
//!
//! ```rust,no_run
//! use std::path::Path;
//! use video_clipper::video::{Encoder, EncoderSession, StreamSettings};
//! use video_clipper::Result;
//!
//! struct NullEncoder;
//!
//! impl Encoder for NullEncoder {
//!     fn name(&self) -> &str {
//!         "null"
//!     }
//!
//!     fn start(
//!         &self,
//!         _path: &Path,
//!         _settings: &StreamSettings,
//!     ) -> Result<Box<dyn EncoderSession>> {
//!         unimplemented!()
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{ClipperError, Result},
    pipeline::{JobRunner, RangeExportDriver, SegmentationDriver},
};
