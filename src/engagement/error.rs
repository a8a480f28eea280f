use std::path::PathBuf;

use thiserror::Error;

/// Per-frame faults. The pipeline logs these and treats the frame as a gap.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("invalid face crop: bbox=({x:.1},{y:.1},{width:.1}x{height:.1}) frame={frame_width}x{frame_height}")]
    InvalidFaceCrop {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        frame_width: u32,
        frame_height: u32,
    },
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector backend failed: {0}")]
    Backend(String),
}

/// Raised once while loading the engagement model artifact; the classifier
/// falls back to rules when it sees one of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelArtifactError {
    #[error("model artifact not found: {0}")]
    Missing(PathBuf),
    #[error("model artifact unreadable: {0}")]
    Io(String),
    #[error("model artifact corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported model artifact format version {found} (supported: {supported})")]
    UnsupportedFormat { found: u32, supported: u32 },
    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

/// Gaze model weights that do not fit the configured bin layout. This is a
/// configuration error and is propagated to the caller.
#[derive(Debug, Error)]
pub enum GazeModelError {
    #[error("gaze weights unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("gaze weights corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("gaze model config mismatch: expected {expected}, found {found}")]
    ConfigMismatch { expected: String, found: String },
    #[error("gaze weights have wrong shape: {0}")]
    Shape(String),
}
