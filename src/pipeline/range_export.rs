use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::{
    config::{Config, ExportConfig},
    error::{ConfigError, ExportError, Result},
    pipeline::naming::{OutputLayout, SequenceAllocator},
    video::{
        mask::{self, MaskSpec, Region},
        writer::{write_clip, EncodedClip, Encoder},
        FrameRateDecimator, FrameSource,
    },
};

/// One labeled clip to cut out of a source video.
///
/// Immutable once built; `mask` regions are validated against the source
/// dimensions when the job runs, before any frame is decoded.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: u64,
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
    pub target_fps: f64,
    pub mask: Option<Vec<Region>>,
    pub output: PathBuf,
}

impl ExportJob {
    pub fn new(
        id: u64,
        source: impl Into<PathBuf>,
        start: f64,
        end: f64,
        target_fps: f64,
        mask: Option<Vec<Region>>,
        output: impl Into<PathBuf>,
    ) -> Result<Self> {
        check_range(start, end)?;

        Ok(Self {
            id,
            source: source.into(),
            start,
            end,
            target_fps,
            mask,
            output: output.into(),
        })
    }
}

fn check_range(start: f64, end: f64) -> Result<()> {
    let invalid = |reason: &str| ExportError::InvalidRange {
        start,
        end,
        reason: reason.to_string(),
    };

    if !start.is_finite() || !end.is_finite() {
        return Err(invalid("bounds must be finite").into());
    }
    if start < 0.0 {
        return Err(invalid("start is negative").into());
    }
    if end <= start {
        return Err(invalid("end must be after start").into());
    }
    Ok(())
}

/// A clip request as the labeling front end (or a manifest) describes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
    pub action: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub save_with_mask: bool,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl ExportRequest {
    /// Check the action label and the time range
    pub fn validate(&self, config: &ExportConfig) -> Result<()> {
        if !config.actions.iter().any(|a| a == &self.action) {
            return Err(ExportError::UnknownAction {
                action: self.action.clone(),
                known: config.actions.join(", "),
            }
            .into());
        }
        check_range(self.start, self.end)
    }

    /// Resolve the output path for clip `id` and build the job
    pub fn into_job(
        self,
        config: &ExportConfig,
        layout: &OutputLayout,
        id: u64,
    ) -> Result<ExportJob> {
        self.validate(config)?;
        self.build(config, layout, id)
    }

    /// Like [`into_job`](Self::into_job), drawing the id from `ids` only once
    /// the request is valid so rejected requests leave no gap
    pub fn into_numbered_job(
        self,
        config: &ExportConfig,
        layout: &OutputLayout,
        ids: &SequenceAllocator,
    ) -> Result<ExportJob> {
        self.validate(config)?;
        let id = ids.next_id();
        self.build(config, layout, id)
    }

    fn build(self, config: &ExportConfig, layout: &OutputLayout, id: u64) -> Result<ExportJob> {
        let prefix = self.prefix.as_deref().unwrap_or(&config.default_prefix);
        let output = layout.clip_path(&self.action, Some(prefix), id);
        let mask = self.save_with_mask.then_some(self.regions);

        ExportJob::new(id, self.source, self.start, self.end, config.target_fps, mask, output)
    }
}

/// A TOML file listing many `[[clips]]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportManifest {
    #[serde(default)]
    pub clips: Vec<ExportRequest>,
}

impl ExportManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        toml::from_str(&content).map_err(|e| {
            ConfigError::ParseFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Cuts `[start, end)` out of a source into one file.
///
/// Frames are selected by 0-based position in `[round(start * fps),
/// round(end * fps))`, decimated with a counter starting at 1 at `start`,
/// masked when the job carries a mask, then written in a single flush.
pub struct RangeExportDriver<'a> {
    encoder: &'a dyn Encoder,
}

impl<'a> RangeExportDriver<'a> {
    pub fn new(encoder: &'a dyn Encoder) -> Self {
        Self { encoder }
    }

    /// Returns `Ok(None)` when the range retained no frames
    pub fn run<S: FrameSource>(&self, job: &ExportJob, source: S) -> Result<Option<EncodedClip>> {
        let span = info_span!("export", job = job.id, source = %job.source.display());
        let _guard = span.enter();

        self.export(job, source).map_err(|e| {
            error!("Export {} of {} failed: {}", job.id, job.source.display(), e);
            e
        })
    }

    fn export<S: FrameSource>(
        &self,
        job: &ExportJob,
        mut source: S,
    ) -> Result<Option<EncodedClip>> {
        // fail before decoding anything; the writer re-checks atomically
        if job.output.exists() {
            return Err(ExportError::OutputConflict {
                path: job.output.display().to_string(),
            }
            .into());
        }

        let metadata = source.metadata().clone();
        let decimator = FrameRateDecimator::new(metadata.fps, job.target_fps)?;
        let mask = job
            .mask
            .as_ref()
            .map(|regions| MaskSpec::new(metadata.width, metadata.height, regions.iter().copied()))
            .transpose()?;

        let first = metadata.frame_at(job.start);
        let last = metadata.frame_at(job.end);
        if first >= metadata.frame_count {
            warn!(
                "Range starts at frame {} but {} reports {} frames",
                first,
                job.source.display(),
                metadata.frame_count
            );
        }

        info!(
            "Exporting {:.2}s-{:.2}s (frames {}..{}) of {} at {} fps{}",
            job.start,
            job.end,
            first,
            last,
            job.source.display(),
            job.target_fps,
            if mask.is_some() { " with mask" } else { "" }
        );

        let mut retained = Vec::new();
        for (position, frame) in (0u64..).zip(source.frames()) {
            let frame = frame?;
            if position < first {
                continue;
            }
            if position >= last {
                break;
            }

            let local = position - first + 1;
            if !decimator.retains(local) {
                continue;
            }
            let frame = match &mask {
                Some(mask) => mask::apply(frame, mask)?,
                None => frame,
            };
            retained.push(frame);
        }
        source.close()?;

        debug!("Retained {} frames for {}", retained.len(), job.output.display());
        if retained.is_empty() {
            warn!(
                "Range {:.2}s-{:.2}s of {} holds no frames, nothing written",
                job.start,
                job.end,
                job.source.display()
            );
        }

        write_clip(self.encoder, &job.output, job.target_fps, &retained)
    }
}

/// Export `job` with whatever source type fits its path
pub fn export_file(
    job: &ExportJob,
    config: &Config,
    encoder: &dyn Encoder,
) -> Result<Option<EncodedClip>> {
    let source = crate::video::open_source(&job.source, &config.decoder)?;
    RangeExportDriver::new(encoder).run(job, source)
}
