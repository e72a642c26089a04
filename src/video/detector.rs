use rayon::prelude::*;

use crate::video::types::{Frame, CHANNELS};

/// Default mean channel value (0-255 scale) at or below which a frame is black
pub const DEFAULT_BLACK_THRESHOLD: f64 = 0.01;

/// Highest meaningful threshold, every frame is black at this value
pub const MAX_BLACK_THRESHOLD: f64 = 255.0;

/// Rows handed to a single rayon task when summing a frame
const ROWS_PER_TASK: usize = 64;

/// Classify a frame as black (near-zero average intensity) or content.
///
/// The channel sum is divided by `height * width * channels`, giving the
/// mean channel value on the 0-255 scale, and the frame is black when that
/// mean is at or below `threshold`. Stateless: no smoothing, no hysteresis.
pub fn is_black(frame: &Frame, threshold: f64) -> bool {
    let samples = frame.width() as usize * frame.height() as usize * CHANNELS;
    if samples == 0 {
        return true;
    }

    let row_len = frame.width() as usize * CHANNELS;
    let total: u64 = frame
        .as_bytes()
        .par_chunks(row_len * ROWS_PER_TASK)
        .map(|chunk| chunk.iter().map(|&v| v as u64).sum::<u64>())
        .sum();

    total as f64 / samples as f64 <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_frame_is_black_for_any_threshold() {
        let frame = Frame::new_black(32, 24);
        for t in [0.0, 0.01, 0.5, 1.0] {
            assert!(is_black(&frame, t), "threshold {t}");
        }
    }

    #[test]
    fn test_full_intensity_frame_is_never_black_below_one() {
        let frame = Frame::new_filled(32, 24, [255, 255, 255]);
        for t in [0.0, 0.01, 0.5, 0.999] {
            assert!(!is_black(&frame, t), "threshold {t}");
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // one channel at 3 over a 1x1 frame averages to exactly 1.0
        let frame = Frame::new_filled(1, 1, [3, 0, 0]);
        assert!(is_black(&frame, 1.0));
        assert!(!is_black(&frame, 0.99));
    }

    #[test]
    fn test_dim_noise_stays_black_at_default() {
        let mut frame = Frame::new_black(100, 100);
        // a handful of bright pixels in an otherwise black frame
        frame.as_bytes_mut()[..30].fill(5);
        assert!(is_black(&frame, DEFAULT_BLACK_THRESHOLD));
    }

    #[test]
    fn test_every_frame_is_black_at_max_threshold() {
        let frame = Frame::new_filled(8, 8, [255, 255, 255]);
        assert!(is_black(&frame, MAX_BLACK_THRESHOLD));
        assert!(!is_black(&frame, 254.9));
    }

    #[test]
    fn test_large_frame_sums_across_chunks() {
        let frame = Frame::new_filled(640, 480, [1, 1, 1]);
        assert!(is_black(&frame, 1.0));
        assert!(!is_black(&frame, 0.5));
    }
}
