/// Default frame rate of the synthetic session (frames per second).
pub const DEFAULT_SYNTHETIC_FPS: f64 = 30.0;

/// Default length of the synthetic session (seconds).
pub const DEFAULT_SYNTHETIC_SECONDS: f64 = 60.0;

/// Frames between progress log lines.
pub const PROGRESS_LOG_INTERVAL_FRAMES: u64 = 150;
