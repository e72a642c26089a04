//! # Video Processing Module
//!
//! Frame decoding, black-frame detection, decimation, masking and encoding.

pub mod decimator;
pub mod detector;
pub mod mask;
pub mod source;
pub mod types;
pub mod writer;

mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use decimator::FrameRateDecimator;
pub use detector::{is_black, DEFAULT_BLACK_THRESHOLD, MAX_BLACK_THRESHOLD};
pub use mask::{MaskSpec, Region};
pub use process::program_available;
pub use source::{open_source, probe, FfmpegSource, FrameSource, ImageSequenceSource, MemorySource};
pub use types::{Frame, VideoMetadata};
pub use writer::{
    write_clip, ClipWriter, EncodedClip, Encoder, EncoderSession, FfmpegEncoder, StreamSettings,
};
