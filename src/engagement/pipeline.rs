//! Per-session frame processing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engagement::blink::{binocular_ear, BlinkBand, BlinkDetector, BlinkStatus};
use crate::engagement::classifier::EngagementClassifier;
use crate::engagement::config::{BlinkBandConfig, EngagementConfig};
use crate::engagement::face::FaceLocator;
use crate::engagement::features::FeatureVector;
use crate::engagement::gaze::GazeEstimator;
use crate::engagement::types::{EngagementResult, Frame, GazeReading};
use crate::engagement::window::TemporalAggregator;

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub face_detected: bool,
    pub gaze: Option<GazeReading>,
    pub ear: Option<f64>,
    pub blink: BlinkStatus,
    pub blink_band: Option<BlinkBand>,
    pub features: FeatureVector,
    pub result: EngagementResult,
}

impl FrameReport {
    pub fn blinked(&self) -> bool {
        matches!(self.blink, BlinkStatus::Active { blink: Some(_), .. })
    }
}

/// Owns the mutable per-session state (blink detector, windows); the face
/// detector, gaze model and classifier are shared handles.
#[derive(Debug)]
pub struct SessionPipeline {
    locator: FaceLocator,
    gaze: GazeEstimator,
    classifier: Arc<EngagementClassifier>,
    blink: BlinkDetector,
    aggregator: TemporalAggregator,
    bands: BlinkBandConfig,
    last_timestamp_ms: Option<f64>,
}

impl SessionPipeline {
    pub fn new(
        config: &EngagementConfig,
        locator: FaceLocator,
        gaze: GazeEstimator,
        classifier: Arc<EngagementClassifier>,
    ) -> Self {
        Self {
            locator,
            gaze,
            classifier,
            blink: BlinkDetector::new(config.blink.clone()),
            aggregator: TemporalAggregator::new(&config.window),
            bands: config.rules.blink_bands.clone(),
            last_timestamp_ms: None,
        }
    }

    pub fn classifier(&self) -> &Arc<EngagementClassifier> {
        &self.classifier
    }

    pub fn blink_detector(&self) -> &BlinkDetector {
        &self.blink
    }

    /// Run one frame through locate → gaze/EAR → blink → windows → features
    /// → classify. Per-frame faults degrade the frame to a gap; this never
    /// fails.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let ts = frame.timestamp_ms;
        let in_order = ts.is_finite() && self.last_timestamp_ms.map_or(true, |last| ts >= last);

        let mut gaze = None;
        let mut ear = None;
        if in_order {
            if let Some(face) = self.locator.locate(frame) {
                match self.gaze.estimate(frame, &face) {
                    Ok(reading) => {
                        gaze = Some(reading);
                        ear = binocular_ear(&face);
                    }
                    Err(e) => {
                        tracing::warn!(frame = frame.index, error = %e, "Dropping face for this frame");
                    }
                }
            }
        } else {
            tracing::debug!(
                frame = frame.index,
                timestamp_ms = ts,
                last_timestamp_ms = ?self.last_timestamp_ms,
                "Out-of-order frame, leaving session state untouched"
            );
        }

        let status_ts = if in_order {
            ts
        } else {
            self.last_timestamp_ms.unwrap_or(0.0)
        };
        let blink = match ear {
            Some(value) => self.blink.update(value, ts),
            None => self.blink.status_at(status_ts),
        };

        if in_order {
            self.aggregator.record_frame(ts, gaze, ear);
            self.last_timestamp_ms = Some(ts);
        }

        let features = FeatureVector::build(&self.aggregator.snapshot(), &blink);
        let result = self.classifier.classify(&features);

        tracing::trace!(
            frame = frame.index,
            face = gaze.is_some(),
            window_frames = self.aggregator.frames_in_window(),
            level = result.level.as_u8(),
            confidence = result.confidence,
            "Frame classified"
        );

        FrameReport {
            frame_index: frame.index,
            timestamp_ms: ts,
            face_detected: gaze.is_some(),
            gaze,
            ear,
            blink_band: blink.blink_rate().map(|rate| BlinkBand::classify(rate, &self.bands)),
            blink,
            features,
            result,
        }
    }

    /// Forget all windows and restart blink calibration.
    pub fn reset(&mut self, config: &EngagementConfig) {
        self.blink = BlinkDetector::new(config.blink.clone());
        self.aggregator.reset();
        self.last_timestamp_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::error::DetectorError;
    use crate::engagement::face::FaceDetector;
    use crate::engagement::types::{BoundingBox, EngagementLevel, EyeLandmarks, FaceRegion};

    struct Always(Option<FaceRegion>);

    impl FaceDetector for Always {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.iter().cloned().collect())
        }
    }

    fn pipeline(face: Option<FaceRegion>) -> SessionPipeline {
        let config = EngagementConfig::default();
        SessionPipeline::new(
            &config,
            FaceLocator::new(Arc::new(Always(face)), config.face.clone()),
            GazeEstimator::with_gradient_prior(&config.gaze),
            Arc::new(EngagementClassifier::rule_based(config.rules.clone())),
        )
    }

    fn flat_frame(index: u64, ts: f64) -> Frame {
        Frame::new(index, ts, 64, 64, vec![128; 64 * 64])
    }

    #[test]
    fn empty_stream_frames_are_disengaged_gaps() {
        let mut p = pipeline(None);
        let report = p.process_frame(&flat_frame(0, 0.0));
        assert!(!report.face_detected);
        assert_eq!(report.result.level, EngagementLevel::Disengaged);
        assert!(!report.blink.is_active());
    }

    #[test]
    fn crop_outside_frame_is_treated_as_gap() {
        let face = FaceRegion {
            bbox: BoundingBox::new(500.0, 500.0, 10.0, 10.0),
            confidence: 0.9,
            left_eye: EyeLandmarks::default(),
            right_eye: EyeLandmarks::default(),
        };
        let mut p = pipeline(Some(face));
        let report = p.process_frame(&flat_frame(0, 0.0));
        assert!(!report.face_detected);
        assert_eq!(report.ear, None);
    }

    #[test]
    fn out_of_order_frame_does_not_touch_windows() {
        let face = FaceRegion {
            bbox: BoundingBox::new(0.0, 0.0, 32.0, 32.0),
            confidence: 0.9,
            left_eye: EyeLandmarks::default(),
            right_eye: EyeLandmarks::default(),
        };
        let mut p = pipeline(Some(face));
        p.process_frame(&flat_frame(0, 1_000.0));
        let stale = p.process_frame(&flat_frame(1, 500.0));
        assert!(!stale.face_detected);
        assert_eq!(stale.features.get("face_ratio"), Some(1.0));
    }
}
