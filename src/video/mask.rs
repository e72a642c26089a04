//! Static rectangular masking.
//!
//! A [`MaskSpec`] is validated once against the frame dimensions and then
//! applied, unchanged, to every retained frame of a job. The mask does not
//! follow camera motion.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VideoError};
use crate::video::types::{Frame, CHANNELS};

/// Axis-aligned rectangle `(x1, y1, x2, y2)` in source pixel coordinates.
///
/// Covers the half-open pixel ranges `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Region covering a whole `width x height` frame
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Map a rectangle drawn on a scaled preview canvas back to source pixels.
    ///
    /// `rect` is `(left, top, width, height)` in canvas units. Coordinates are
    /// scaled by `frame / canvas` and truncated.
    pub fn from_canvas(
        rect: (f64, f64, f64, f64),
        canvas_size: (u32, u32),
        frame_size: (u32, u32),
    ) -> Self {
        let (left, top, w, h) = rect;
        let sx = frame_size.0 as f64 / canvas_size.0 as f64;
        let sy = frame_size.1 as f64 / canvas_size.1 as f64;
        let scale = |v: f64, s: f64| (v * s).max(0.0) as u32;

        Self::new(
            scale(left, sx),
            scale(top, sy),
            scale(left + w, sx),
            scale(top + h, sy),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.x1 == self.x2 || self.y1 == self.y2
    }

    /// Check the coordinate invariant against a `width x height` frame
    pub fn validate(&self, width: u32, height: u32) -> Result<()> {
        let reason = if self.x1 > self.x2 || self.y1 > self.y2 {
            Some("corners are reversed")
        } else if self.x2 > width || self.y2 > height {
            Some("region extends past the frame")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(VideoError::InvalidMaskRegion {
                x1: self.x1,
                y1: self.y1,
                x2: self.x2,
                y2: self.y2,
                width,
                height,
                reason: reason.to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl From<[u32; 4]> for Region {
    fn from([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<Region> for [u32; 4] {
    fn from(r: Region) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Parses `x1,y1,x2,y2`
impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid region '{}': {}", s, e))?;

        match parts.as_slice() {
            &[x1, y1, x2, y2] => Ok(Self::new(x1, y1, x2, y2)),
            _ => Err(format!("invalid region '{}': expected x1,y1,x2,y2", s)),
        }
    }
}

/// A set of regions validated against fixed frame dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSpec {
    width: u32,
    height: u32,
    regions: Vec<Region>,
}

impl MaskSpec {
    /// Validate every region against a `width x height` frame.
    ///
    /// Regions that violate the coordinate invariant are rejected, never
    /// clamped.
    pub fn new(width: u32, height: u32, regions: impl IntoIterator<Item = Region>) -> Result<Self> {
        let regions: Vec<Region> = regions.into_iter().collect();
        for region in &regions {
            region.validate(width, height)?;
        }
        Ok(Self { width, height, regions })
    }

    /// Mask that leaves frames untouched
    pub fn empty(width: u32, height: u32) -> Self {
        Self { width, height, regions: Vec::new() }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.iter().all(Region::is_empty)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Zero every pixel covered by `mask` on all channels.
///
/// Pure and frame local: overlapping regions are harmless and applying the
/// same mask twice gives the same frame. An empty mask returns the frame
/// unchanged.
pub fn apply(mut frame: Frame, mask: &MaskSpec) -> Result<Frame> {
    let (width, height) = frame.dimensions();
    if (width, height) != mask.dimensions() {
        return Err(VideoError::FrameShapeMismatch {
            expected_width: mask.width,
            expected_height: mask.height,
            actual_width: width,
            actual_height: height,
        }
        .into());
    }
    if mask.is_empty() {
        return Ok(frame);
    }

    let row_len = width as usize * CHANNELS;
    frame
        .as_bytes_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for region in mask.regions.iter().filter(|r| y >= r.y1 && y < r.y2) {
                row[region.x1 as usize * CHANNELS..region.x2 as usize * CHANNELS].fill(0);
            }
        });

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 200])
        });
        Frame::new(img)
    }

    #[test]
    fn test_region_zeroes_half_open_range() {
        let mask = MaskSpec::new(8, 6, [Region::new(2, 1, 4, 3)]).unwrap();
        let out = apply(Frame::new_filled(8, 6, [9, 9, 9]), &mask).unwrap();

        assert_eq!(out.get_pixel(2, 1), [0, 0, 0]);
        assert_eq!(out.get_pixel(3, 2), [0, 0, 0]);
        assert_eq!(out.get_pixel(4, 2), [9, 9, 9]);
        assert_eq!(out.get_pixel(3, 3), [9, 9, 9]);
        assert_eq!(out.get_pixel(1, 1), [9, 9, 9]);
    }

    #[test]
    fn test_full_frame_region_zeroes_everything() {
        let mask = MaskSpec::new(16, 9, [Region::full(16, 9)]).unwrap();
        let out = apply(gradient(16, 9), &mask).unwrap();
        assert!(out.as_bytes().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_empty_mask_is_byte_identical() {
        let frame = gradient(16, 9);
        let out = apply(frame.clone(), &MaskSpec::empty(16, 9)).unwrap();
        assert_eq!(out.as_bytes(), frame.as_bytes());
    }

    #[test]
    fn test_apply_is_idempotent_and_order_independent() {
        let a = Region::new(0, 0, 10, 5);
        let b = Region::new(5, 2, 16, 9);
        let ab = MaskSpec::new(16, 9, [a, b]).unwrap();
        let ba = MaskSpec::new(16, 9, [b, a]).unwrap();

        let once = apply(gradient(16, 9), &ab).unwrap();
        let twice = apply(once.clone(), &ab).unwrap();
        let reversed = apply(gradient(16, 9), &ba).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once, reversed);
    }

    #[test]
    fn test_invalid_regions_are_rejected() {
        assert!(MaskSpec::new(10, 10, [Region::new(5, 0, 2, 4)]).is_err());
        assert!(MaskSpec::new(10, 10, [Region::new(0, 6, 2, 4)]).is_err());
        assert!(MaskSpec::new(10, 10, [Region::new(0, 0, 11, 4)]).is_err());
        assert!(MaskSpec::new(10, 10, [Region::new(0, 0, 10, 10)]).is_ok());
        assert!(MaskSpec::new(10, 10, [Region::new(3, 3, 3, 3)]).is_ok());
    }

    #[test]
    fn test_frame_size_must_match_mask() {
        let mask = MaskSpec::new(10, 10, [Region::new(0, 0, 2, 2)]).unwrap();
        assert!(apply(Frame::new_black(12, 10), &mask).is_err());
    }

    #[test]
    fn test_canvas_coordinates_scale_to_frame() {
        // drawn on a 600x400 preview of a 1920x1080 frame
        let region = Region::from_canvas((60.0, 40.0, 300.0, 200.0), (600, 400), (1920, 1080));
        assert_eq!(region, Region::new(192, 108, 1152, 648));
    }

    #[test]
    fn test_region_parses_from_cli_form() {
        assert_eq!("1, 2,3,4".parse::<Region>().unwrap(), Region::new(1, 2, 3, 4));
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("a,b,c,d".parse::<Region>().is_err());
    }
}
