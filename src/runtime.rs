//! Streaming session runtime.
//!
//! A blocking producer pulls frames from the source and publishes them into
//! a single-slot `watch` channel; the consumer always takes the newest frame,
//! so a slow pipeline skips frames instead of queueing them. Frames lost this
//! way show up as gaps in the frame index and are counted as dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::constants::PROGRESS_LOG_INTERVAL_FRAMES;
use crate::engagement::pipeline::{FrameReport, SessionPipeline};
use crate::engagement::session::{SessionRecorder, SessionSummary};
use crate::engagement::types::Frame;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("frame source failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("frame producer task failed: {0}")]
    Producer(String),
}

/// A camera, file or replay buffer. `Ok(None)` ends the stream.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Replays prepared frames, optionally paced like a live camera.
#[derive(Debug)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
    pace: Option<Duration>,
}

impl ReplaySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            pace: None,
        }
    }

    pub fn paced(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            self.pace = Some(Duration::from_secs_f64(1.0 / fps));
        }
        self
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        Ok(self.frames.pop_front())
    }
}

/// Drive one session until the source ends or shutdown fires.
///
/// Reports are offered to `reports` without waiting; a full channel drops
/// the report. A failing source ends the session with an error.
pub async fn run_session<S: FrameSource>(
    mut source: S,
    mut pipeline: SessionPipeline,
    reports: Option<mpsc::Sender<FrameReport>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<SessionSummary, RuntimeError> {
    let classifier = pipeline.classifier().clone();
    let mut recorder = SessionRecorder::new(classifier.mode(), classifier.is_degraded());
    tracing::info!(
        session_id = %recorder.session_id(),
        mode = classifier.mode().as_str(),
        degraded = classifier.is_degraded(),
        "Session started"
    );

    let (frame_tx, mut frame_rx) = watch::channel::<Option<Arc<Frame>>>(None);
    let stop = Arc::new(AtomicBool::new(false));
    let producer_stop = stop.clone();

    let producer = tokio::task::spawn_blocking(move || -> Result<u64, SourceError> {
        let mut produced = 0u64;
        while !producer_stop.load(Ordering::Relaxed) {
            match source.next_frame()? {
                Some(frame) => {
                    produced += 1;
                    if frame_tx.send(Some(Arc::new(frame))).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(produced)
    });

    let mut next_index = 0u64;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested, ending session");
                break;
            }
            changed = frame_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = frame_rx.borrow_and_update().clone();
                let Some(frame) = latest else {
                    continue;
                };

                let skipped = frame.index.saturating_sub(next_index);
                if skipped > 0 {
                    recorder.note_dropped(skipped);
                    tracing::debug!(skipped, frame = frame.index, "Pipeline behind source, frames skipped");
                }
                next_index = frame.index + 1;

                let report = pipeline.process_frame(&frame);
                recorder.record(&report);

                if report.frame_index % PROGRESS_LOG_INTERVAL_FRAMES == 0 {
                    tracing::info!(
                        frame = report.frame_index,
                        level = report.result.level.as_str(),
                        confidence = report.result.confidence,
                        face = report.face_detected,
                        "Engagement update"
                    );
                }

                if let Some(tx) = &reports {
                    if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(report) {
                        tracing::debug!(frame = dropped.frame_index, "Report channel full, dropping report");
                    }
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    drop(frame_rx);
    let produced = producer
        .await
        .map_err(|e| RuntimeError::Producer(e.to_string()))??;

    let summary = recorder.summary();
    tracing::info!(
        session_id = %summary.session_id,
        produced,
        processed = summary.frames_processed,
        dropped = summary.frames_dropped,
        score = summary.engagement_score,
        "Session finished"
    );
    Ok(summary)
}

/// Drain `reports`, logging every change of engagement level. Returns the
/// number of changes seen once all senders are gone.
pub async fn log_level_changes(mut reports: mpsc::Receiver<FrameReport>) -> usize {
    let mut last_level = None;
    let mut changes = 0;
    while let Some(report) = reports.recv().await {
        let level = report.result.level;
        if last_level != Some(level) {
            tracing::info!(
                frame = report.frame_index,
                level = level.as_str(),
                confidence = report.result.confidence,
                mode = report.result.mode.as_str(),
                "Engagement level changed"
            );
            last_level = Some(level);
            changes += 1;
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::classifier::EngagementClassifier;
    use crate::engagement::config::EngagementConfig;
    use crate::engagement::face::FaceLocator;
    use crate::engagement::gaze::GazeEstimator;
    use crate::engagement::synthetic::SyntheticScenario;

    fn pipeline_for(scenario: &SyntheticScenario) -> (Vec<Frame>, SessionPipeline) {
        let config = EngagementConfig::default();
        let session = scenario.render();
        let pipeline = SessionPipeline::new(
            &config,
            FaceLocator::new(Arc::new(session.detector), config.face.clone()),
            GazeEstimator::with_gradient_prior(&config.gaze),
            Arc::new(EngagementClassifier::rule_based(config.rules.clone())),
        );
        (session.frames, pipeline)
    }

    struct Failing {
        remaining: u32,
    }

    impl FrameSource for Failing {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Read("camera unplugged".to_string()));
            }
            self.remaining -= 1;
            std::thread::sleep(Duration::from_millis(2));
            Ok(Some(Frame::new(
                u64::from(5 - self.remaining),
                f64::from(5 - self.remaining) * 33.0,
                8,
                8,
                vec![0; 64],
            )))
        }
    }

    #[tokio::test]
    async fn every_frame_is_processed_or_counted_as_dropped() {
        let scenario = SyntheticScenario::classroom(3, 10.0, 4.0);
        let (frames, pipeline) = pipeline_for(&scenario);
        let total = frames.len() as u64;
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (tx, mut rx) = mpsc::channel(4);

        let summary = run_session(ReplaySource::new(frames), pipeline, Some(tx), shutdown_rx)
            .await
            .unwrap();

        assert!(summary.frames_processed > 0);
        assert_eq!(summary.frames_processed + summary.frames_dropped, total);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn level_changes_are_reported_to_a_listener() {
        let scenario = SyntheticScenario::classroom(3, 10.0, 8.0);
        let (frames, pipeline) = pipeline_for(&scenario);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (tx, rx) = mpsc::channel::<FrameReport>(256);
        let listener = tokio::spawn(log_level_changes(rx));

        let summary = run_session(ReplaySource::new(frames), pipeline, Some(tx), shutdown_rx)
            .await
            .unwrap();
        let changes = listener.await.unwrap();
        assert!(changes >= 1);
        assert!(changes as u64 <= summary.frames_processed);
    }

    #[tokio::test]
    async fn paced_source_loses_no_frames() {
        let scenario = SyntheticScenario::classroom(3, 10.0, 2.0);
        let (frames, pipeline) = pipeline_for(&scenario);
        let total = frames.len() as u64;
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let summary = run_session(ReplaySource::new(frames).paced(200.0), pipeline, None, shutdown_rx)
            .await
            .unwrap();
        assert_eq!(summary.frames_processed + summary.frames_dropped, total);
    }

    #[tokio::test]
    async fn source_failure_ends_the_session() {
        let (_, pipeline) = pipeline_for(&SyntheticScenario::classroom(1, 10.0, 1.0));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let result = run_session(Failing { remaining: 5 }, pipeline, None, shutdown_rx).await;
        assert!(matches!(result, Err(RuntimeError::Source(SourceError::Read(_)))));
    }

    #[tokio::test]
    async fn shutdown_stops_a_live_session() {
        let scenario = SyntheticScenario::classroom(5, 30.0, 60.0);
        let (frames, pipeline) = pipeline_for(&scenario);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_session(
            ReplaySource::new(frames).paced(30.0),
            pipeline,
            None,
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(()).unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.frames_processed < scenario.total_frames());
    }
}
