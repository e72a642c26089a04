use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{ExportError, Result, VideoError};
use crate::video::process::StderrDrain;
use crate::video::types::Frame;

/// Stream parameters for one output file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Backend that turns a sequence of raw frames into a container file
pub trait Encoder: Send + Sync {
    /// Returns the unique name of this encoder
    fn name(&self) -> &str;

    /// Start encoding into `path`.
    ///
    /// The file at `path` already exists (reserved and empty) when this is
    /// called; the encoder owns its contents from here on.
    fn start(&self, path: &Path, settings: &StreamSettings) -> Result<Box<dyn EncoderSession>>;
}

/// One in-progress output file
pub trait EncoderSession: Send {
    fn push(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalize the container
    fn finish(self: Box<Self>) -> Result<()>;

    /// Stop without finalizing; the caller removes the file
    fn abort(self: Box<Self>);
}

/// Summary of a finished output file
#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub path: PathBuf,
    pub frame_count: usize,
    pub fps: f64,
    pub duration: f64,
    pub file_size: u64,
}

/// Writes retained frames to a new file without ever overwriting.
///
/// The output path is reserved atomically on creation. Until
/// [`ClipWriter::finish`] succeeds, any failure or drop aborts the encoder
/// and removes the partial file.
pub struct ClipWriter {
    path: PathBuf,
    settings: StreamSettings,
    session: Option<Box<dyn EncoderSession>>,
    frames_written: usize,
}

impl ClipWriter {
    pub fn create<P: AsRef<Path>>(
        encoder: &dyn Encoder,
        path: P,
        settings: StreamSettings,
    ) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ExportError::OutputConflict { path: path.display().to_string() }.into());
            }
            Err(e) => return Err(e.into()),
        }

        let session = match encoder.start(path, &settings) {
            Ok(session) => session,
            Err(e) => {
                remove_partial(path);
                return Err(e);
            }
        };

        debug!(
            "Writing {} with {} encoder ({}x{} @ {} fps)",
            path.display(),
            encoder.name(),
            settings.width,
            settings.height,
            settings.fps
        );

        Ok(Self {
            path: path.to_path_buf(),
            settings,
            session: Some(session),
            frames_written: 0,
        })
    }

    /// Append one frame; its size must match the declared stream size
    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = frame.dimensions();
        if (width, height) != (self.settings.width, self.settings.height) {
            return Err(VideoError::FrameShapeMismatch {
                expected_width: self.settings.width,
                expected_height: self.settings.height,
                actual_width: width,
                actual_height: height,
            }
            .into());
        }

        let session = self.session.as_mut().ok_or_else(|| VideoError::EncodingFailed {
            reason: format!("{} is already closed", self.path.display()),
        })?;
        session.push(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Finalize the container. On failure the partial file is removed.
    pub fn finish(mut self) -> Result<EncodedClip> {
        let session = self.session.take().ok_or_else(|| VideoError::EncodingFailed {
            reason: format!("{} is already closed", self.path.display()),
        })?;

        if let Err(e) = session.finish() {
            remove_partial(&self.path);
            return Err(e);
        }

        let file_size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let clip = EncodedClip {
            path: self.path.clone(),
            frame_count: self.frames_written,
            fps: self.settings.fps,
            duration: self.frames_written as f64 / self.settings.fps,
            file_size,
        };

        info!(
            "Wrote {} ({} frames, {:.2}s, {} KB)",
            clip.path.display(),
            clip.frame_count,
            clip.duration,
            clip.file_size / 1024
        );
        Ok(clip)
    }

    fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
            remove_partial(&self.path);
            warn!("Discarded partial output {}", self.path.display());
        }
    }
}

impl Drop for ClipWriter {
    fn drop(&mut self) {
        self.discard();
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

/// Write `frames` to a new file at `path`.
///
/// An empty buffer writes nothing and returns `Ok(None)`.
pub fn write_clip(
    encoder: &dyn Encoder,
    path: &Path,
    fps: f64,
    frames: &[Frame],
) -> Result<Option<EncodedClip>> {
    let Some(first) = frames.first() else {
        debug!("Nothing to write for {}", path.display());
        return Ok(None);
    };

    let settings = StreamSettings {
        fps,
        width: first.width(),
        height: first.height(),
    };
    let mut writer = ClipWriter::create(encoder, path, settings)?;
    for frame in frames {
        writer.write(frame)?;
    }
    writer.finish().map(Some)
}

// ==========================================
// FFMPEG ENCODER
// ==========================================

/// Encodes by piping rgb24 rawvideo into an ffmpeg process
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn extension(&self) -> &str {
        &self.config.extension
    }

    fn quality_to_crf(quality: u8) -> u8 {
        (51 - ((quality.min(100) as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn build_command(&self, path: &Path, settings: &StreamSettings) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_program);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", settings.width, settings.height)])
            .args(["-framerate", &settings.fps.to_string()])
            .args(["-i", "-"])
            .arg("-an")
            .args(["-c:v", &self.config.codec])
            .args(["-pix_fmt", &self.config.pixel_format])
            .args(["-r", &settings.fps.to_string()]);
        if self.config.codec.contains("264") || self.config.codec.contains("265") {
            cmd.args(["-crf", &Self::quality_to_crf(self.config.quality).to_string()]);
        }
        // the path was reserved empty by ClipWriter
        cmd.arg("-y").arg(path);
        cmd
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}

impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn start(&self, path: &Path, settings: &StreamSettings) -> Result<Box<dyn EncoderSession>> {
        let mut child = self
            .build_command(path, settings)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VideoError::EncodingFailed {
                reason: format!("failed to spawn {}: {}", self.config.ffmpeg_program, e),
            })?;

        let stdin = child.stdin.take();
        let stderr = StderrDrain::spawn(child.stderr.take());

        Ok(Box::new(FfmpegSession {
            path: path.to_path_buf(),
            child,
            stdin,
            stderr: Some(stderr),
        }))
    }
}

struct FfmpegSession {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<StderrDrain>,
}

impl FfmpegSession {
    fn failure(&mut self, what: String) -> VideoError {
        self.stdin = None;
        let _ = self.child.wait();
        let stderr = self.stderr.take().map(StderrDrain::collect).unwrap_or_default();
        VideoError::EncodingFailed {
            reason: format!("{}: {}: {}", self.path.display(), what, stderr),
        }
    }
}

impl EncoderSession for FfmpegSession {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.failure("encoder input already closed".to_string()).into());
        };
        if let Err(e) = stdin.write_all(frame.as_bytes()) {
            return Err(self.failure(format!("write failed: {}", e)).into());
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // closing stdin signals end of input
        self.stdin = None;
        let status = self.child.wait().map_err(|e| VideoError::EncodingFailed {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        let stderr = self.stderr.take().map(StderrDrain::collect).unwrap_or_default();

        if !status.success() {
            return Err(VideoError::EncodingFailed {
                reason: format!(
                    "{}: ffmpeg exited with {}: {}",
                    self.path.display(),
                    status,
                    stderr
                ),
            }
            .into());
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.stdin = None;
        let _kill_error = self.child.kill();
        let _wait_error = self.child.wait();
        if let Some(drain) = self.stderr.take() {
            drain.collect();
        }
    }
}
