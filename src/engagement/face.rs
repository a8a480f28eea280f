//! Primary-face selection on top of an external detector.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::engagement::config::{FaceConfig, SelectionPolicy};
use crate::engagement::error::DetectorError;
use crate::engagement::types::{Frame, FaceRegion};

/// Anything that can find faces (with eye landmarks) in a frame.
///
/// Implementations hold read-only weights and are shared between sessions.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Arc<D> {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
        (**self).detect(frame)
    }
}

#[derive(Clone)]
pub struct FaceLocator {
    detector: Arc<dyn FaceDetector>,
    config: FaceConfig,
}

impl std::fmt::Debug for FaceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceLocator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FaceLocator {
    pub fn new(detector: Arc<dyn FaceDetector>, config: FaceConfig) -> Self {
        Self { detector, config }
    }

    pub fn config(&self) -> &FaceConfig {
        &self.config
    }

    /// The single subject for this frame, if any. Detector failures are
    /// logged and reported as "no face".
    pub fn locate(&self, frame: &Frame) -> Option<FaceRegion> {
        match self.detector.detect(frame) {
            Ok(candidates) => select_primary(candidates, &self.config),
            Err(e) => {
                tracing::warn!(frame = frame.index, error = %e, "Face detector failed, treating frame as no face");
                None
            }
        }
    }
}

fn is_usable(face: &FaceRegion, min_confidence: f64) -> bool {
    face.confidence.is_finite()
        && face.confidence >= min_confidence
        && face.bbox.is_finite()
        && face.bbox.area() > 0.0
}

/// Filter by confidence and box sanity, then pick one face per policy.
pub fn select_primary(candidates: Vec<FaceRegion>, config: &FaceConfig) -> Option<FaceRegion> {
    let total = candidates.len();
    let primary = candidates
        .into_iter()
        .filter(|f| is_usable(f, config.min_confidence))
        .max_by(|a, b| compare(a, b, config.selection));

    if total > 1 {
        tracing::trace!(candidates = total, "Multiple faces, keeping primary subject");
    }
    primary
}

fn compare(a: &FaceRegion, b: &FaceRegion, policy: SelectionPolicy) -> Ordering {
    let by_area = a.bbox.area().total_cmp(&b.bbox.area());
    let by_confidence = a.confidence.total_cmp(&b.confidence);
    match policy {
        SelectionPolicy::LargestArea => by_area.then(by_confidence),
        SelectionPolicy::HighestConfidence => by_confidence.then(by_area),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::types::{BoundingBox, EyeLandmarks};

    fn face(x: f64, size: f64, confidence: f64) -> FaceRegion {
        FaceRegion {
            bbox: BoundingBox::new(x, 0.0, size, size),
            confidence,
            left_eye: EyeLandmarks::default(),
            right_eye: EyeLandmarks::default(),
        }
    }

    struct Fixed(Vec<FaceRegion>);

    impl FaceDetector for Fixed {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl FaceDetector for Broken {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            Err(DetectorError::Backend("model not loaded".into()))
        }
    }

    fn frame() -> Frame {
        Frame::new(0, 0.0, 4, 4, vec![0; 16])
    }

    #[test]
    fn largest_face_wins_by_default() {
        let faces = vec![face(0.0, 40.0, 0.99), face(50.0, 80.0, 0.7)];
        let picked = select_primary(faces, &FaceConfig::default()).unwrap();
        assert_eq!(picked.bbox.x, 50.0);
    }

    #[test]
    fn confidence_policy_prefers_confident_face() {
        let config = FaceConfig {
            selection: SelectionPolicy::HighestConfidence,
            ..FaceConfig::default()
        };
        let faces = vec![face(0.0, 40.0, 0.99), face(50.0, 80.0, 0.7)];
        assert_eq!(select_primary(faces, &config).unwrap().bbox.x, 0.0);
    }

    #[test]
    fn low_confidence_and_degenerate_boxes_are_dropped() {
        let faces = vec![
            face(0.0, 80.0, 0.3),
            face(10.0, 0.0, 0.9),
            face(20.0, 50.0, f64::NAN),
        ];
        assert!(select_primary(faces, &FaceConfig::default()).is_none());
    }

    #[test]
    fn detector_error_is_absorbed() {
        let locator = FaceLocator::new(Arc::new(Broken), FaceConfig::default());
        assert!(locator.locate(&frame()).is_none());

        let locator = FaceLocator::new(
            Arc::new(Fixed(vec![face(0.0, 10.0, 0.8)])),
            FaceConfig::default(),
        );
        assert!(locator.locate(&frame()).is_some());
    }
}
