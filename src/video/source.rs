use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DecoderConfig;
use crate::error::{Result, VideoError};
use crate::video::process::StderrDrain;
use crate::video::types::{Frame, VideoMetadata};

/// Ordered, single-pass supply of decoded frames.
///
/// Frames come out in strictly increasing source order. A source cannot be
/// rewound; dropping it releases the decoder on every exit path.
pub trait FrameSource {
    fn metadata(&self) -> &VideoMetadata;

    /// Decode the next frame, `Ok(None)` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release decode resources. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Lazy iterator over the remaining frames; stops after the first error
    fn frames(&mut self) -> Frames<'_, Self>
    where
        Self: Sized,
    {
        Frames { source: self, done: false }
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn metadata(&self) -> &VideoMetadata {
        (**self).metadata()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Iterator returned by [`FrameSource::frames`]
pub struct Frames<'a, S: ?Sized> {
    source: &'a mut S,
    done: bool,
}

impl<S: FrameSource + ?Sized> Iterator for Frames<'_, S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Open `path` with the source that fits it: a directory of still images
/// becomes an [`ImageSequenceSource`], anything else goes through ffmpeg.
pub fn open_source<P: AsRef<Path>>(
    path: P,
    config: &DecoderConfig,
) -> Result<Box<dyn FrameSource>> {
    let path = path.as_ref();
    if path.is_dir() {
        Ok(Box::new(ImageSequenceSource::open_dir(path, config.image_sequence_fps)?))
    } else {
        Ok(Box::new(FfmpegSource::open_with(path, config)?))
    }
}

// ==========================================
// FFMPEG PIPE
// ==========================================

/// Decodes a container by piping rgb24 rawvideo out of an ffmpeg process.
///
/// Metadata comes from ffprobe before the decoder is spawned. The child is
/// killed and reaped on drop so no zombie processes accumulate.
pub struct FfmpegSource {
    path: PathBuf,
    metadata: VideoMetadata,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<StderrDrain>,
    frames_read: u64,
    exhausted: bool,
    closed: bool,
}

impl FfmpegSource {
    /// Open with the default `ffmpeg`/`ffprobe` programs
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &DecoderConfig::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, config: &DecoderConfig) -> Result<Self> {
        let path = path.as_ref();
        let unreadable = |reason: String| VideoError::UnreadableVideo {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(unreadable("file not found".to_string()).into());
        }

        let metadata = probe(path, &config.ffprobe_program)?;
        info!(
            "Opened {}: {}x{} @ {:.3} fps, {} frames ({})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.frame_count,
            metadata.codec
        );

        let mut child = Self::decode_command(&config.ffmpeg_program, path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| unreadable(format!("failed to spawn {}: {}", config.ffmpeg_program, e)))?;

        let stdout = child.stdout.take();
        let stderr = Some(StderrDrain::spawn(child.stderr.take()));

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            child,
            stdout,
            stderr,
            frames_read: 0,
            exhausted: false,
            closed: false,
        })
    }

    /// Decode the first video stream to packed rgb24 on stdout, one output
    /// frame per decoded frame
    fn decode_command(program: &str, path: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            // keep decoded dimensions equal to the probed ones
            .arg("-noautorotate")
            .arg("-i")
            .arg(path)
            .args(["-map", "0:v:0", "-an"])
            // rawvideo would otherwise force CFR and duplicate or drop frames of
            // variable-rate input; -fps_mode only exists from ffmpeg 5.1 on
            .args(["-vsync", "passthrough"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
        cmd
    }

    /// Wait for a decoder that reached end of stream and report its exit status
    fn reap(&mut self) -> Result<()> {
        self.stdout = None;
        let status = self.child.wait().map_err(|e| VideoError::DecodingFailed {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        let stderr = self.stderr.take().map(StderrDrain::collect).unwrap_or_default();
        self.closed = true;

        if status.success() {
            Ok(())
        } else {
            Err(VideoError::DecodingFailed {
                reason: format!(
                    "{}: ffmpeg exited with {}: {}",
                    self.path.display(),
                    status,
                    stderr
                ),
            }
            .into())
        }
    }

    fn kill(&mut self) {
        if self.closed {
            return;
        }
        self.stdout = None;
        let _kill_error = self.child.kill();
        let _wait_error = self.child.wait();
        if let Some(drain) = self.stderr.take() {
            drain.collect();
        }
        self.closed = true;
    }
}

impl FrameSource for FfmpegSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.exhausted || self.closed {
            return Ok(None);
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.metadata.frame_size()];
        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.exhausted = true;
                    return Err(VideoError::DecodingFailed {
                        reason: format!(
                            "{}: read failed after {} frames: {}",
                            self.path.display(),
                            self.frames_read,
                            e
                        ),
                    }
                    .into());
                }
            }
        }

        if filled == 0 {
            self.exhausted = true;
            debug!(
                "Decoder for {} finished after {} frames",
                self.path.display(),
                self.frames_read
            );
            self.reap()?;
            return Ok(None);
        }
        if filled < buf.len() {
            self.exhausted = true;
            return Err(VideoError::DecodingFailed {
                reason: format!(
                    "{}: truncated frame {} ({} of {} bytes)",
                    self.path.display(),
                    self.frames_read,
                    filled,
                    buf.len()
                ),
            }
            .into());
        }

        self.frames_read += 1;
        let (width, height) = (self.metadata.width, self.metadata.height);
        let frame = Frame::from_rgb_bytes(width, height, buf).ok_or_else(|| {
            VideoError::DecodingFailed {
                reason: format!("{}: frame buffer has the wrong size", self.path.display()),
            }
        })?;
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            if !self.exhausted {
                debug!(
                    "Stopping decoder for {} after {} frames",
                    self.path.display(),
                    self.frames_read
                );
            }
            self.kill();
        }
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read stream metadata with ffprobe
pub fn probe<P: AsRef<Path>>(path: P, ffprobe_program: &str) -> Result<VideoMetadata> {
    let path = path.as_ref();
    let unreadable = |reason: String| VideoError::UnreadableVideo {
        path: path.display().to_string(),
        reason,
    };

    let output = Command::new(ffprobe_program)
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration,codec_name:format=duration",
        ])
        .args(["-of", "json"])
        .arg(path)
        .output()
        .map_err(|e| unreadable(format!("failed to run {}: {}", ffprobe_program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(unreadable(format!("ffprobe failed: {}", stderr.trim())).into());
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| unreadable("ffprobe output is not utf-8".to_string()))?;
    parse_probe(path, &json)
}

fn parse_probe(path: &Path, json: &str) -> Result<VideoMetadata> {
    let unreadable = |reason: &str| VideoError::UnreadableVideo {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| unreadable(&format!("invalid ffprobe output: {}", e)))?;
    let stream = parsed.streams.into_iter().next().ok_or_else(|| unreadable("no video stream"))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(unreadable("video stream has no dimensions").into());
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| unreadable("unknown frame rate"))?;

    let duration = stream
        .duration
        .as_deref()
        .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = match stream.nb_frames.as_deref().and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => n,
        None => {
            warn!("{} does not report a frame count, estimating from duration", path.display());
            (duration * fps).round() as u64
        }
    };
    if frame_count == 0 {
        return Err(unreadable("video has no frames").into());
    }

    Ok(VideoMetadata {
        fps,
        width,
        height,
        frame_count,
        duration: if duration > 0.0 { duration } else { frame_count as f64 / fps },
        codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Parse an ffprobe rational such as `30000/1001`
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

// ==========================================
// IN-MEMORY AND STILL-IMAGE SOURCES
// ==========================================

/// Frames already held in memory
pub struct MemorySource {
    metadata: VideoMetadata,
    frames: VecDeque<Frame>,
}

impl MemorySource {
    /// Wrap `frames` played back at `fps`; all frames must share one size
    pub fn new(fps: f64, frames: Vec<Frame>) -> Result<Self> {
        let first = frames.first().ok_or_else(|| VideoError::UnreadableVideo {
            path: "<memory>".to_string(),
            reason: "video has no frames".to_string(),
        })?;
        let (width, height) = first.dimensions();

        let metadata = VideoMetadata {
            fps,
            width,
            height,
            frame_count: frames.len() as u64,
            duration: frames.len() as f64 / fps,
            codec: "rawvideo".to_string(),
        };
        Ok(Self { metadata, frames: frames.into() })
    }
}

impl FrameSource for MemorySource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// A directory of still images played back in file-name order
pub struct ImageSequenceSource {
    metadata: VideoMetadata,
    pending: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn open_dir<P: AsRef<Path>>(dir: P, fps: f64) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && !is_hidden_file(&path) && is_image_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Self::from_paths(dir, paths, fps)
    }

    fn from_paths(origin: &Path, paths: Vec<PathBuf>, fps: f64) -> Result<Self> {
        let first = paths.first().ok_or_else(|| VideoError::UnreadableVideo {
            path: origin.display().to_string(),
            reason: "no image files found".to_string(),
        })?;
        let (width, height) =
            image::image_dimensions(first).map_err(|e| VideoError::UnreadableVideo {
                path: first.display().to_string(),
                reason: e.to_string(),
            })?;

        let metadata = VideoMetadata {
            fps,
            width,
            height,
            frame_count: paths.len() as u64,
            duration: paths.len() as f64 / fps,
            codec: "image".to_string(),
        };
        info!(
            "Image sequence {}: {} stills at {}x{}",
            origin.display(),
            paths.len(),
            width,
            height
        );

        Ok(Self { metadata, pending: paths.into() })
    }
}

impl FrameSource for ImageSequenceSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|e| VideoError::DecodingFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let frame = Frame::new(image.to_rgb8());

        if frame.dimensions() != (self.metadata.width, self.metadata.height) {
            return Err(VideoError::FrameShapeMismatch {
                expected_width: self.metadata.width,
                expected_height: self.metadata.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            }
            .into());
        }
        Ok(Some(frame))
    }
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png")
    )
}

fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_probe_reads_stream_fields() {
        let json = r#"{
            "streams": [{
                "codec_name": "h264", "width": 1280, "height": 720,
                "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001",
                "duration": "10.010000", "nb_frames": "300"
            }],
            "format": {"duration": "10.020000"}
        }"#;
        let meta = parse_probe(Path::new("a.mp4"), json).unwrap();
        assert_eq!((meta.width, meta.height), (1280, 720));
        assert!((meta.fps - 29.97).abs() < 0.01);
        assert_eq!(meta.frame_count, 300);
        assert_eq!(meta.codec, "h264");
    }

    #[test]
    fn test_parse_probe_estimates_missing_frame_count() {
        let json = r#"{"streams": [{"width": 64, "height": 48, "avg_frame_rate": "0/0",
            "r_frame_rate": "25/1"}], "format": {"duration": "4.0"}}"#;
        let meta = parse_probe(Path::new("a.mkv"), json).unwrap();
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.frame_count, 100);
    }

    #[test]
    fn test_parse_probe_rejects_empty_video() {
        let no_stream = r#"{"streams": [], "format": {"duration": "1.0"}}"#;
        assert!(parse_probe(Path::new("a.mp4"), no_stream).is_err());

        let no_frames = r#"{"streams": [{"width": 64, "height": 48, "avg_frame_rate": "30/1",
            "nb_frames": "0"}]}"#;
        let err = parse_probe(Path::new("a.mp4"), no_frames).unwrap_err();
        assert!(matches!(err, crate::ClipperError::Video(VideoError::UnreadableVideo { .. })));
    }

    #[test]
    fn test_parse_rate_forms() {
        assert_eq!(parse_rate("15/1"), Some(15.0));
        assert_eq!(parse_rate("24"), Some(24.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    #[test]
    fn test_decoder_passes_frames_through_unretimed() {
        let cmd = FfmpegSource::decode_command("ffmpeg", Path::new("phone.mp4"));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        let sync = position("-vsync");
        assert_eq!(args[sync + 1], "passthrough");
        // an output option, so it must sit between the input and the muxer
        assert!(position("-i") < sync);
        assert!(sync < position("-f"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempdir().unwrap();
        let result = FfmpegSource::open(dir.path().join("missing.mp4"));
        assert!(matches!(
            result,
            Err(crate::ClipperError::Video(VideoError::UnreadableVideo { .. }))
        ));
    }

    #[test]
    fn test_memory_source_yields_in_order_then_stops() {
        let frames = vec![
            Frame::new_filled(4, 4, [1, 1, 1]),
            Frame::new_filled(4, 4, [2, 2, 2]),
        ];
        let mut source = MemorySource::new(30.0, frames).unwrap();
        assert_eq!(source.metadata().frame_count, 2);

        let seen: Vec<u8> = source.frames().map(|f| f.unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(seen, vec![1, 2]);
        assert!(source.next_frame().unwrap().is_none());
        assert!(MemorySource::new(30.0, Vec::new()).is_err());
    }

    #[test]
    fn test_image_sequence_reads_sorted_stills() {
        let dir = tempdir().unwrap();
        Frame::new_filled(8, 6, [20, 0, 0]).save_png(dir.path().join("002.png")).unwrap();
        Frame::new_filled(8, 6, [10, 0, 0]).save_png(dir.path().join("001.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = open_source(dir.path(), &DecoderConfig::default()).unwrap();
        assert_eq!(source.metadata().frame_count, 2);
        assert_eq!((source.metadata().width, source.metadata().height), (8, 6));

        let reds: Vec<u8> = source.frames().map(|f| f.unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(reds, vec![10, 20]);
    }

    #[test]
    fn test_image_sequence_rejects_mixed_sizes() {
        let dir = tempdir().unwrap();
        Frame::new_black(8, 6).save_png(dir.path().join("a.png")).unwrap();
        Frame::new_black(4, 4).save_png(dir.path().join("b.png")).unwrap();

        let mut source = ImageSequenceSource::open_dir(dir.path(), 30.0).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
    }
}
