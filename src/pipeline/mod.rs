//! # Clip Pipelines
//!
//! The two drivers that turn a source video into output clips, the output
//! naming scheme they share, and the runner that executes many jobs at once.
//!
//! - [`SegmentationDriver`] splits a recording at black frames (batch).
//! - [`RangeExportDriver`] cuts one labeled time range (interactive).

pub mod naming;
pub mod range_export;
pub mod runner;
pub mod segmentation;

// Re-exports for convenience
pub use naming::{fps_label, OutputLayout, SequenceAllocator};
pub use range_export::{export_file, ExportJob, ExportManifest, ExportRequest, RangeExportDriver};
pub use runner::{JobOutcome, JobRunner};
pub use segmentation::{split_file, SegmentationDriver, SplitJob, SplitReport};
