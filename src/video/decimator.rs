use tracing::warn;

use crate::error::{Result, VideoError};

/// Nearest-integer-ratio frame decimation.
///
/// `skip = round(source_fps / target_fps)` with round-half-away-from-zero, and
/// the frame at 1-based position `i` is kept iff `i % skip == 0`. For
/// non-integer ratios the realized rate drifts from the target; that drift
/// is accepted and reported through [`FrameRateDecimator::realized_fps`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateDecimator {
    source_fps: f64,
    target_fps: f64,
    skip: u64,
}

impl FrameRateDecimator {
    pub fn new(source_fps: f64, target_fps: f64) -> Result<Self> {
        let unsupported = || VideoError::UnsupportedFrameRate { source_fps, target_fps };

        let usable = |fps: f64| fps.is_finite() && fps > 0.0;
        if !usable(source_fps) || !usable(target_fps) {
            return Err(unsupported().into());
        }
        // upsampling is not supported
        if target_fps > source_fps {
            return Err(unsupported().into());
        }

        let skip = (source_fps / target_fps).round() as u64;
        let decimator = Self { source_fps, target_fps, skip: skip.max(1) };

        let realized = decimator.realized_fps();
        if (realized - target_fps).abs() > 1e-6 {
            warn!(
                "Decimating {:.3} fps with skip {} gives {:.3} fps instead of {:.3}",
                source_fps, decimator.skip, realized, target_fps
            );
        }

        Ok(decimator)
    }

    /// Keep every `skip`-th frame
    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn source_fps(&self) -> f64 {
        self.source_fps
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Rate actually produced by keeping every `skip`-th source frame
    pub fn realized_fps(&self) -> f64 {
        self.source_fps / self.skip as f64
    }

    /// Whether the frame at 1-based `position` is kept
    pub fn retains(&self, position: u64) -> bool {
        position != 0 && position % self.skip == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halving_keeps_every_second_frame() {
        let d = FrameRateDecimator::new(30.0, 15.0).unwrap();
        assert_eq!(d.skip(), 2);
        let kept: Vec<u64> = (1..=8).filter(|&i| d.retains(i)).collect();
        assert_eq!(kept, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_non_integer_ratio_drifts() {
        let d = FrameRateDecimator::new(29.0, 15.0).unwrap();
        assert_eq!(d.skip(), 2);
        assert!((d.realized_fps() - 14.5).abs() < 1e-9);
    }

    #[test]
    fn test_half_rounds_away_from_zero() {
        // 37.5 / 15 = 2.5 -> 3
        let d = FrameRateDecimator::new(37.5, 15.0).unwrap();
        assert_eq!(d.skip(), 3);
    }

    #[test]
    fn test_equal_rates_keep_everything() {
        let d = FrameRateDecimator::new(15.0, 15.0).unwrap();
        assert_eq!(d.skip(), 1);
        assert!((1..=5).all(|i| d.retains(i)));
        assert!(!d.retains(0));
    }

    #[test]
    fn test_rejects_upsampling_and_nonsense() {
        assert!(FrameRateDecimator::new(15.0, 30.0).is_err());
        assert!(FrameRateDecimator::new(30.0, 0.0).is_err());
        assert!(FrameRateDecimator::new(f64::NAN, 15.0).is_err());
        assert!(FrameRateDecimator::new(-30.0, 15.0).is_err());
    }
}
