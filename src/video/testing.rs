//! Test doubles: an in-process encoder that writes raw rgb24 bytes and
//! remembers every finished clip, and a source whose decoder breaks partway.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, VideoError};
use crate::video::source::{FrameSource, MemorySource};
use crate::video::types::{Frame, VideoMetadata};
use crate::video::writer::{Encoder, EncoderSession, StreamSettings};

type Finished = Arc<Mutex<Vec<(PathBuf, Vec<Frame>)>>>;

#[derive(Default)]
pub(crate) struct RecordingEncoder {
    finished: Finished,
    started: Arc<AtomicUsize>,
    fail_on_finish: bool,
}

impl RecordingEncoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on_finish() -> Self {
        Self { fail_on_finish: true, ..Self::default() }
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Finished clips in completion order
    pub(crate) fn clips(&self) -> Vec<(PathBuf, Vec<Frame>)> {
        self.finished.lock().unwrap().clone()
    }

    pub(crate) fn frame_counts(&self) -> Vec<(PathBuf, usize)> {
        self.clips().into_iter().map(|(p, f)| (p, f.len())).collect()
    }
}

impl Encoder for RecordingEncoder {
    fn name(&self) -> &str {
        "recording"
    }

    fn start(&self, path: &Path, _settings: &StreamSettings) -> Result<Box<dyn EncoderSession>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let file = OpenOptions::new().write(true).truncate(true).open(path)?;
        Ok(Box::new(RecordingSession {
            path: path.to_path_buf(),
            file,
            frames: Vec::new(),
            finished: Arc::clone(&self.finished),
            fail_on_finish: self.fail_on_finish,
        }))
    }
}

struct RecordingSession {
    path: PathBuf,
    file: std::fs::File,
    frames: Vec<Frame>,
    finished: Finished,
    fail_on_finish: bool,
}

impl EncoderSession for RecordingSession {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        self.file.write_all(frame.as_bytes())?;
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if self.fail_on_finish {
            return Err(VideoError::EncodingFailed {
                reason: "refusing to finalize".to_string(),
            }
            .into());
        }
        self.file.flush()?;
        let frames = std::mem::take(&mut self.frames);
        self.finished.lock().unwrap().push((self.path.clone(), frames));
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

/// Yields `frames` in order, then fails the next decode
pub(crate) struct GlitchingSource {
    inner: MemorySource,
    remaining: usize,
}

impl GlitchingSource {
    pub(crate) fn new(fps: f64, frames: Vec<Frame>) -> Self {
        let remaining = frames.len();
        // report a longer stream so the glitch lands mid-video
        let padded = frames.iter().cloned().chain(frames.first().cloned()).collect();
        Self {
            inner: MemorySource::new(fps, padded).unwrap(),
            remaining,
        }
    }
}

impl FrameSource for GlitchingSource {
    fn metadata(&self) -> &VideoMetadata {
        self.inner.metadata()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Err(VideoError::DecodingFailed {
                reason: "corrupt packet".to_string(),
            }
            .into());
        }
        self.remaining -= 1;
        self.inner.next_frame()
    }
}
