use std::path::PathBuf;

use tracing::{debug, error, info, info_span};

use crate::{
    config::Config,
    error::Result,
    video::{
        detector::is_black,
        writer::{write_clip, EncodedClip, Encoder},
        Frame, FrameRateDecimator, FrameSource,
    },
};

/// One batch split of a single recording
#[derive(Debug, Clone)]
pub struct SplitJob {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub clip_prefix: String,
    pub extension: String,
    pub target_fps: f64,
    pub black_threshold: f64,
}

impl SplitJob {
    pub fn from_config<P: Into<PathBuf>>(source: P, config: &Config) -> Self {
        Self {
            source: source.into(),
            output_dir: config.split.output_dir.clone(),
            clip_prefix: config.split.clip_prefix.clone(),
            extension: config.encoder.extension.clone(),
            target_fps: config.split.target_fps,
            black_threshold: config.split.black_threshold,
        }
    }

    /// `{output_dir}/{prefix}_{n}.{ext}`
    pub fn clip_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.{}", self.clip_prefix, index, self.extension))
    }
}

/// What a split produced
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub source: PathBuf,
    pub frames_decoded: u64,
    pub black_frames: u64,
    pub clips: Vec<EncodedClip>,
}

enum SegmentState {
    Idle,
    Accumulating(Vec<Frame>),
}

/// Splits a recording into sub-clips at black frames.
///
/// Content frames are decimated with a position counter that restarts at 1
/// after every black frame. Each run of retained frames is written to its own
/// file, numbered from 0 in flush order.
pub struct SegmentationDriver<'a> {
    encoder: &'a dyn Encoder,
    progress: Option<Box<dyn FnMut(f64) + Send + 'a>>,
}

impl<'a> SegmentationDriver<'a> {
    pub fn new(encoder: &'a dyn Encoder) -> Self {
        Self { encoder, progress: None }
    }

    /// Receive the completed percentage at every 10% step
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(f64) + Send + 'a,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn run<S: FrameSource>(&mut self, job: &SplitJob, source: S) -> Result<SplitReport> {
        let span = info_span!("split", source = %job.source.display());
        let _guard = span.enter();

        self.split(job, source).map_err(|e| {
            error!("Split of {} failed: {}", job.source.display(), e);
            e
        })
    }

    fn split<S: FrameSource>(&mut self, job: &SplitJob, mut source: S) -> Result<SplitReport> {
        let metadata = source.metadata().clone();
        let decimator = FrameRateDecimator::new(metadata.fps, job.target_fps)?;

        info!(
            "Splitting {} on black frames: {:.3} fps -> {} fps (keep every {})",
            job.source.display(),
            metadata.fps,
            job.target_fps,
            decimator.skip()
        );

        let mut state = SegmentState::Idle;
        let mut position = 0u64;
        let mut frames_decoded = 0u64;
        let mut black_frames = 0u64;
        let mut clips = Vec::new();
        let mut last_step = 0u64;

        for frame in source.frames() {
            let frame = frame?;
            frames_decoded += 1;

            if is_black(&frame, job.black_threshold) {
                black_frames += 1;
                position = 0;
                let open = std::mem::replace(&mut state, SegmentState::Idle);
                if let SegmentState::Accumulating(frames) = open {
                    self.flush(job, &mut clips, frames)?;
                }
            } else {
                position += 1;
                if decimator.retains(position) {
                    match &mut state {
                        SegmentState::Accumulating(frames) => frames.push(frame),
                        SegmentState::Idle => state = SegmentState::Accumulating(vec![frame]),
                    }
                }
            }

            last_step = self.report_progress(frames_decoded, metadata.frame_count, last_step);
        }

        if let SegmentState::Accumulating(frames) = state {
            self.flush(job, &mut clips, frames)?;
        }
        source.close()?;

        info!(
            "Split {} into {} clips ({} frames decoded, {} black)",
            job.source.display(),
            clips.len(),
            frames_decoded,
            black_frames
        );

        Ok(SplitReport {
            source: job.source.clone(),
            frames_decoded,
            black_frames,
            clips,
        })
    }

    fn flush(
        &self,
        job: &SplitJob,
        clips: &mut Vec<EncodedClip>,
        frames: Vec<Frame>,
    ) -> Result<()> {
        let path = job.clip_path(clips.len());
        debug!("Flushing segment {} ({} frames)", clips.len(), frames.len());
        if let Some(clip) = write_clip(self.encoder, &path, job.target_fps, &frames)? {
            clips.push(clip);
        }
        Ok(())
    }

    /// Emits at each new 10% step and returns the step reached
    fn report_progress(&mut self, decoded: u64, total: u64, last_step: u64) -> u64 {
        if total == 0 {
            return last_step;
        }
        let percent = (decoded as f64 / total as f64 * 100.0).min(100.0);
        let step = (percent / 10.0).floor() as u64;
        if step > last_step {
            debug!("Progress: {:.2}%", percent);
            if let Some(callback) = self.progress.as_mut() {
                callback(percent);
            }
            return step;
        }
        last_step
    }
}

/// Split `job.source` with whatever source type fits the path
pub fn split_file(job: &SplitJob, config: &Config, encoder: &dyn Encoder) -> Result<SplitReport> {
    let source = crate::video::open_source(&job.source, &config.decoder)?;
    SegmentationDriver::new(encoder).run(job, source)
}
