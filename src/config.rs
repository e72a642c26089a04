use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    video::detector::{DEFAULT_BLACK_THRESHOLD, MAX_BLACK_THRESHOLD},
};

/// Main configuration for video-clipper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decoder programs and still-image playback rate
    pub decoder: DecoderConfig,

    /// Output encoding settings shared by both drivers
    pub encoder: EncoderConfig,

    /// Black-frame batch splitting
    pub split: SplitConfig,

    /// Interactive range export
    pub export: ExportConfig,

    /// Job scheduling
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.decoder.validate()?;
        self.encoder.validate()?;
        self.split.validate()?;
        self.export.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn check_fps(key: &str, fps: f64) -> Result<()> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(invalid(key, fps).into());
    }
    Ok(())
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg_program: String,
    pub ffprobe_program: String,

    /// Playback rate assumed for a directory of still images
    pub image_sequence_fps: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_program: "ffmpeg".to_string(),
            ffprobe_program: "ffprobe".to_string(),
            image_sequence_fps: 30.0,
        }
    }
}

impl DecoderConfig {
    fn validate(&self) -> Result<()> {
        check_fps("decoder.image_sequence_fps", self.image_sequence_fps)
    }
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_program: String,

    /// ffmpeg video codec name
    pub codec: String,

    /// Output pixel format
    pub pixel_format: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Container extension for written clips
    pub extension: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_program: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            quality: 85,
            extension: "mp4".to_string(),
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(invalid("encoder.quality", self.quality).into());
        }
        if self.extension.is_empty() || self.extension.contains(['/', '\\', '.']) {
            return Err(invalid("encoder.extension", &self.extension).into());
        }
        if self.codec.is_empty() {
            return Err(invalid("encoder.codec", &self.codec).into());
        }
        Ok(())
    }
}

/// Black-frame splitting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Output frame rate of each sub-clip
    pub target_fps: f64,

    /// Mean channel value (0-255 scale) at or below which a frame is black
    pub black_threshold: f64,

    /// Directory the numbered sub-clips are written to
    pub output_dir: PathBuf,

    /// File name prefix, clips are named `{prefix}_{n}`
    pub clip_prefix: String,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            target_fps: 15.0,
            black_threshold: DEFAULT_BLACK_THRESHOLD,
            output_dir: PathBuf::from("output"),
            clip_prefix: "clip".to_string(),
        }
    }
}

impl SplitConfig {
    fn validate(&self) -> Result<()> {
        check_fps("split.target_fps", self.target_fps)?;
        if !(0.0..=MAX_BLACK_THRESHOLD).contains(&self.black_threshold) {
            return Err(invalid("split.black_threshold", self.black_threshold).into());
        }
        if self.clip_prefix.is_empty() {
            return Err(invalid("split.clip_prefix", "").into());
        }
        Ok(())
    }
}

/// Labeled range export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output frame rate of exported clips
    pub target_fps: f64,

    /// Root of the `{fps}fps/{action}/` tree
    pub output_root: PathBuf,

    /// Accepted action labels
    pub actions: Vec<String>,

    /// Prefix used when a job does not name one; empty means no prefix
    pub default_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            target_fps: 15.0,
            output_root: PathBuf::from("processed_videos"),
            actions: ["fall", "slow_fall", "sit", "walk", "lay"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
            default_prefix: String::new(),
        }
    }
}

impl ExportConfig {
    fn validate(&self) -> Result<()> {
        check_fps("export.target_fps", self.target_fps)?;
        if self.actions.is_empty() {
            return Err(invalid("export.actions", "[]").into());
        }
        if let Some(bad) = self
            .actions
            .iter()
            .find(|a| a.is_empty() || a.contains(['/', '\\']))
        {
            return Err(invalid("export.actions", bad).into());
        }
        Ok(())
    }
}

/// Job scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Jobs allowed to run at the same time
    pub max_parallel_jobs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: num_cpus::get(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.max_parallel_jobs == 0 {
            return Err(invalid("runtime.max_parallel_jobs", self.max_parallel_jobs).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.split.target_fps = 10.0;
        original_config.export.actions = vec!["wave".to_string()];

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded_config.split.target_fps, 10.0);
        assert_eq!(loaded_config.export.actions, vec!["wave".to_string()]);
        assert_eq!(loaded_config.encoder.codec, original_config.encoder.codec);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[split]\nblack_threshold = 0.05\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.split.black_threshold, 0.05);
        assert_eq!(config.split.target_fps, 15.0);
        assert_eq!(config.export.actions.len(), 5);
    }

    #[test]
    fn test_threshold_uses_channel_scale() {
        let mut config = Config::default();
        config.split.black_threshold = 16.0;
        assert!(config.validate().is_ok());

        config.split.black_threshold = 255.5;
        assert!(config.validate().is_err());

        config.split.black_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fps_and_quality() {
        let mut config = Config::default();
        config.export.target_fps = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.encoder.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempdir().unwrap();
        assert!(Config::from_file(dir.path().join("nope.toml")).is_err());
    }
}
