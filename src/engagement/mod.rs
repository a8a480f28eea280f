//! Engagement estimation: face → gaze/blink → sliding windows → features →
//! classifier, run once per frame by [`pipeline::SessionPipeline`].

pub mod blink;
pub mod classifier;
pub mod config;
pub mod error;
pub mod face;
pub mod features;
pub mod gaze;
pub mod pipeline;
pub mod session;
pub mod synthetic;
pub mod types;
pub mod window;

pub use classifier::EngagementClassifier;
pub use config::EngagementConfig;
pub use pipeline::{FrameReport, SessionPipeline};
pub use session::{SessionRecorder, SessionSummary};
pub use types::{EngagementLevel, EngagementResult, Frame};
