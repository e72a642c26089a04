use thiserror::Error;

/// Main error type for the video-clipper library
#[derive(Error, Debug)]
pub enum ClipperError {
    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while decoding, transforming or encoding frames
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Unreadable video {path}: {reason}")]
    UnreadableVideo { path: String, reason: String },

    #[error("Video decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("Frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameShapeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Invalid mask region ({x1}, {y1}, {x2}, {y2}) for a {width}x{height} frame: {reason}")]
    InvalidMaskRegion {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("Cannot decimate {source_fps} fps to {target_fps} fps")]
    UnsupportedFrameRate { source_fps: f64, target_fps: f64 },
}

/// Errors tied to a single export or split job
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Output already exists, not overwriting: {path}")]
    OutputConflict { path: String },

    #[error("Invalid time range {start}s..{end}s: {reason}")]
    InvalidRange { start: f64, end: f64, reason: String },

    #[error("Unknown action '{action}' (expected one of: {known})")]
    UnknownAction { action: String, known: String },

    #[error("Job {job} panicked or was aborted: {reason}")]
    JobAborted { job: String, reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using ClipperError
pub type Result<T> = std::result::Result<T, ClipperError>;

impl ClipperError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    ///
    /// Unreadable sources, output conflicts and shape mismatches are never
    /// retried: the same inputs would fail the same way.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Video(VideoError::UnreadableVideo { path, .. }) => {
                format!(
                    "Could not read video file '{}'. Please check the file exists and is a supported format.",
                    path
                )
            }
            Self::Export(ExportError::OutputConflict { path }) => {
                format!(
                    "'{}' already exists. Choose a different prefix or clip id and try again.",
                    path
                )
            }
            Self::Video(VideoError::InvalidMaskRegion { .. }) => {
                format!("{}. Redraw the mask inside the frame.", self)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
