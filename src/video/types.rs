use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Number of channels in every decoded frame (packed RGB)
pub const CHANNELS: usize = 3;

/// Represents a single decoded video frame
///
/// A thin wrapper around an RGB image buffer. Frames are produced by a
/// [`FrameSource`](crate::video::FrameSource) in source order and handed
/// downstream by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self { buffer }
    }

    /// Create a frame from packed rgb24 bytes, `None` if the length is wrong
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Packed rgb24 bytes, row-major
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Save the frame as a PNG file
    pub fn save_png<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.buffer.save(path)
    }
}

/// Video stream metadata as reported by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Source frame rate
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Total frames, as reported by the container or estimated from duration
    pub frame_count: u64,
    /// Duration in seconds
    pub duration: f64,
    pub codec: String,
}

impl VideoMetadata {
    /// Size in bytes of one packed rgb24 frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Convert a time in seconds to the nearest 0-based frame position
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds * self.fps).round().max(0.0) as u64
    }
}
