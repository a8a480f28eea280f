//! Eye aspect ratio and blink detection.
//!
//! The detector runs a one-way state machine: `Calibrating` collects the
//! first K face-visible EAR samples and derives the closed-eye threshold
//! from their mean; `Active` then drives an eye sub-machine
//! Open → Closing → Closed → Opening → Open and counts complete cycles of
//! plausible duration as blinks. Frames without a face never reach the
//! detector, so gaps leave both the baseline and the counters untouched.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engagement::config::{BlinkBandConfig, BlinkConfig};
use crate::engagement::types::{EyeLandmarks, FaceRegion};

/// Horizontal eye widths below this are treated as degenerate landmarks.
const MIN_EYE_WIDTH: f64 = 1e-6;

/// Standard 6-point EAR: (|p2-p6| + |p3-p5|) / (2 * |p1-p4|).
pub fn eye_aspect_ratio(eye: &EyeLandmarks) -> Option<f64> {
    let [p1, p2, p3, p4, p5, p6] = eye.points();
    let horizontal = p1.distance(p4);
    if !horizontal.is_finite() || horizontal < MIN_EYE_WIDTH {
        return None;
    }
    let ear = (p2.distance(p6) + p3.distance(p5)) / (2.0 * horizontal);
    ear.is_finite().then_some(ear)
}

/// Mean EAR of both eyes; falls back to the single usable eye.
pub fn binocular_ear(face: &FaceRegion) -> Option<f64> {
    match (eye_aspect_ratio(&face.left_eye), eye_aspect_ratio(&face.right_eye)) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => None,
    }
}

/// Closed-eye threshold for a calibration sample set. `None` when no finite
/// sample is present.
pub fn calibration_threshold(samples: &[f64], sensitivity: f64) -> Option<f64> {
    finite_mean(samples).map(|baseline| baseline * sensitivity)
}

fn finite_mean(samples: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkEvent {
    pub timestamp_ms: f64,
    pub duration_ms: f64,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum EyeState {
    Open,
    Closing { start_ts: f64 },
    Closed { start_ts: f64 },
    Opening { start_ts: f64 },
}

#[derive(Debug, Clone)]
enum Phase {
    Calibrating {
        samples: Vec<f64>,
    },
    Active {
        baseline: f64,
        threshold: f64,
        open_threshold: f64,
        eye: EyeState,
    },
}

/// Blink-rate band in blinks per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlinkBand {
    Drowsy,
    Low,
    Normal,
    Elevated,
    Stressed,
}

impl BlinkBand {
    pub fn classify(rate: f64, bands: &BlinkBandConfig) -> Self {
        if rate < bands.drowsy_below {
            Self::Drowsy
        } else if rate < bands.normal_min {
            Self::Low
        } else if rate <= bands.normal_max {
            Self::Normal
        } else if rate <= bands.stressed_above {
            Self::Elevated
        } else {
            Self::Stressed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drowsy => "drowsy",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Stressed => "stressed",
        }
    }
}

/// What the detector knows after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "phase")]
pub enum BlinkStatus {
    Calibrating {
        collected: usize,
        required: usize,
    },
    Active {
        threshold: f64,
        eye_closed: bool,
        blink: Option<BlinkEvent>,
        blink_count: u64,
        blink_rate: f64,
    },
}

impl BlinkStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn blink_rate(&self) -> Option<f64> {
        match self {
            Self::Active { blink_rate, .. } => Some(*blink_rate),
            Self::Calibrating { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlinkDetector {
    config: BlinkConfig,
    phase: Phase,
    history: VecDeque<BlinkEvent>,
    total_blinks: u64,
}

impl BlinkDetector {
    pub fn new(config: BlinkConfig) -> Self {
        let capacity = config.calibration_frames;
        Self {
            config,
            phase: Phase::Calibrating {
                samples: Vec::with_capacity(capacity),
            },
            history: VecDeque::new(),
            total_blinks: 0,
        }
    }

    /// Feed one EAR sample from a face-visible frame.
    pub fn update(&mut self, ear: f64, timestamp_ms: f64) -> BlinkStatus {
        if !ear.is_finite() {
            return self.status(timestamp_ms, None);
        }

        let mut blink = None;
        let mut activated = None;
        match &mut self.phase {
            Phase::Calibrating { samples } => {
                samples.push(ear);
                let calibrated = if samples.len() >= self.config.calibration_frames {
                    finite_mean(samples).zip(calibration_threshold(samples, self.config.sensitivity))
                } else {
                    None
                };
                if let Some((baseline, threshold)) = calibrated {
                    let open_threshold =
                        (threshold * (1.0 + self.config.hysteresis)).min(baseline.max(threshold));
                    tracing::info!(
                        baseline,
                        threshold,
                        samples = samples.len(),
                        "Blink calibration complete"
                    );
                    activated = Some(Phase::Active {
                        baseline,
                        threshold,
                        open_threshold,
                        eye: EyeState::Open,
                    });
                }
            }
            Phase::Active {
                threshold,
                open_threshold,
                eye,
                ..
            } => {
                let (next, closed_span) = step_eye(*eye, ear, timestamp_ms, *threshold, *open_threshold);
                *eye = next;
                if let Some((start_ts, end_ts)) = closed_span {
                    let duration_ms = end_ts - start_ts;
                    if duration_ms >= self.config.min_blink_ms
                        && duration_ms <= self.config.max_blink_ms
                    {
                        let event = BlinkEvent {
                            timestamp_ms: end_ts,
                            duration_ms,
                        };
                        self.history.push_back(event);
                        self.total_blinks += 1;
                        blink = Some(event);
                        tracing::trace!(duration_ms, "Blink detected");
                    } else {
                        tracing::debug!(duration_ms, "Eye closure outside blink duration bounds");
                    }
                }
            }
        }
        if let Some(phase) = activated {
            self.phase = phase;
        }

        self.status(timestamp_ms, blink)
    }

    /// Status at `timestamp_ms` without feeding a sample; used for frames
    /// where no face was seen.
    pub fn status_at(&mut self, timestamp_ms: f64) -> BlinkStatus {
        self.status(timestamp_ms, None)
    }

    fn status(&mut self, timestamp_ms: f64, blink: Option<BlinkEvent>) -> BlinkStatus {
        let (threshold, eye_closed) = match &self.phase {
            Phase::Calibrating { samples } => {
                return BlinkStatus::Calibrating {
                    collected: samples.len(),
                    required: self.config.calibration_frames,
                }
            }
            Phase::Active { threshold, eye, .. } => (*threshold, !matches!(eye, EyeState::Open)),
        };
        let blink_rate = self.blink_rate(timestamp_ms);
        BlinkStatus::Active {
            threshold,
            eye_closed,
            blink,
            blink_count: self.total_blinks,
            blink_rate,
        }
    }

    /// Blinks per second over the trailing rate window ending at `now_ms`.
    /// Zero while calibrating.
    pub fn blink_rate(&mut self, now_ms: f64) -> f64 {
        if !self.is_calibrated() {
            return 0.0;
        }
        let window_ms = self.config.rate_window_seconds * 1000.0;
        let cutoff = now_ms - window_ms;
        while let Some(front) = self.history.front() {
            if front.timestamp_ms < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
        let in_window = self
            .history
            .iter()
            .filter(|e| e.timestamp_ms <= now_ms)
            .count();
        in_window as f64 / self.config.rate_window_seconds
    }

    /// Blinks counted since calibration finished.
    pub fn blink_count(&self) -> u64 {
        self.total_blinks
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.phase, Phase::Active { .. })
    }

    pub fn threshold(&self) -> Option<f64> {
        match self.phase {
            Phase::Active { threshold, .. } => Some(threshold),
            Phase::Calibrating { .. } => None,
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        match self.phase {
            Phase::Active { baseline, .. } => Some(baseline),
            Phase::Calibrating { .. } => None,
        }
    }
}

/// One step of the eye sub-machine. Returns the next state and, when the eye
/// has just reopened, the `(closed_at, reopened_at)` span.
fn step_eye(
    state: EyeState,
    ear: f64,
    ts: f64,
    close_threshold: f64,
    open_threshold: f64,
) -> (EyeState, Option<(f64, f64)>) {
    match state {
        EyeState::Open => {
            if ear < close_threshold {
                (EyeState::Closing { start_ts: ts }, None)
            } else {
                (EyeState::Open, None)
            }
        }
        EyeState::Closing { start_ts } => {
            if ear < close_threshold {
                (EyeState::Closed { start_ts }, None)
            } else if ear >= open_threshold {
                // Single-frame dip: still a closure, reopened immediately.
                (EyeState::Open, Some((start_ts, ts)))
            } else {
                (EyeState::Opening { start_ts }, None)
            }
        }
        EyeState::Closed { start_ts } => {
            if ear >= open_threshold {
                (EyeState::Open, Some((start_ts, ts)))
            } else if ear >= close_threshold {
                (EyeState::Opening { start_ts }, None)
            } else {
                (EyeState::Closed { start_ts }, None)
            }
        }
        EyeState::Opening { start_ts } => {
            if ear >= open_threshold {
                (EyeState::Open, Some((start_ts, ts)))
            } else if ear < close_threshold {
                (EyeState::Closed { start_ts }, None)
            } else {
                (EyeState::Opening { start_ts }, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::types::Point;

    fn eye_with_ear(ear: f64) -> EyeLandmarks {
        let w = 0.06;
        let h = ear * w;
        let (cx, cy) = (0.5, 0.5);
        EyeLandmarks([
            Point::new(cx - w / 2.0, cy),
            Point::new(cx - w / 6.0, cy - h / 2.0),
            Point::new(cx + w / 6.0, cy - h / 2.0),
            Point::new(cx + w / 2.0, cy),
            Point::new(cx + w / 6.0, cy + h / 2.0),
            Point::new(cx - w / 6.0, cy + h / 2.0),
        ])
    }

    fn calibrated(config: BlinkConfig, ear: f64) -> (BlinkDetector, f64) {
        let frames = config.calibration_frames;
        let mut detector = BlinkDetector::new(config);
        let mut ts = 0.0;
        for _ in 0..frames {
            detector.update(ear, ts);
            ts += 33.0;
        }
        (detector, ts)
    }

    #[test]
    fn ear_matches_eye_geometry() {
        let ear = eye_aspect_ratio(&eye_with_ear(0.3)).unwrap();
        assert!((ear - 0.3).abs() < 1e-9);
    }

    #[test]
    fn degenerate_eye_has_no_ear() {
        assert_eq!(eye_aspect_ratio(&EyeLandmarks::default()), None);
    }

    #[test]
    fn calibration_sets_threshold_from_mean() {
        let config = BlinkConfig {
            calibration_frames: 4,
            ..BlinkConfig::default()
        };
        let mut detector = BlinkDetector::new(config);
        for (i, ear) in [0.28, 0.30, 0.32, 0.30].iter().enumerate() {
            assert!(!detector.is_calibrated());
            detector.update(*ear, i as f64 * 33.0);
        }
        assert!(detector.is_calibrated());
        assert!((detector.baseline().unwrap() - 0.30).abs() < 1e-12);
        assert!((detector.threshold().unwrap() - 0.24).abs() < 1e-12);
    }

    #[test]
    fn calibration_threshold_is_deterministic() {
        let samples = [0.31, 0.29, 0.30, 0.33, 0.27];
        let a = calibration_threshold(&samples, 0.8);
        let b = calibration_threshold(&samples, 0.8);
        assert_eq!(a, b);
        assert_eq!(calibration_threshold(&[], 0.8), None);
    }

    #[test]
    fn detector_threshold_comes_from_calibration_helper() {
        let samples = [0.31, 0.29, 0.30, 0.33, 0.27, 0.32];
        let config = BlinkConfig {
            calibration_frames: samples.len(),
            sensitivity: 0.75,
            ..BlinkConfig::default()
        };
        let mut detector = BlinkDetector::new(config);
        for (i, ear) in samples.iter().enumerate() {
            detector.update(*ear, i as f64 * 33.0);
        }
        assert_eq!(detector.threshold(), calibration_threshold(&samples, 0.75));
    }

    #[test]
    fn short_closure_counts_as_blink() {
        let (mut detector, mut ts) = calibrated(BlinkConfig::default(), 0.30);
        let mut blinks = 0;
        for ear in [0.30, 0.10, 0.08, 0.09, 0.30, 0.30] {
            if let BlinkStatus::Active { blink: Some(_), .. } = detector.update(ear, ts) {
                blinks += 1;
            }
            ts += 33.0;
        }
        assert_eq!(blinks, 1);
        assert_eq!(detector.blink_count(), 1);
    }

    #[test]
    fn long_closure_is_not_a_blink() {
        let (mut detector, mut ts) = calibrated(BlinkConfig::default(), 0.30);
        detector.update(0.05, ts);
        for _ in 0..40 {
            ts += 33.0;
            detector.update(0.05, ts);
        }
        ts += 33.0;
        detector.update(0.30, ts);
        assert_eq!(detector.blink_count(), 0);
    }

    #[test]
    fn no_blinks_while_calibrating() {
        let mut detector = BlinkDetector::new(BlinkConfig::default());
        let mut ts = 0.0;
        for ear in [0.30, 0.05, 0.30, 0.05, 0.30] {
            let status = detector.update(ear, ts);
            assert!(!status.is_active());
            ts += 100.0;
        }
        assert_eq!(detector.blink_count(), 0);
        assert_eq!(detector.blink_rate(ts), 0.0);
    }

    #[test]
    fn blink_rate_uses_trailing_window() {
        let config = BlinkConfig {
            rate_window_seconds: 10.0,
            ..BlinkConfig::default()
        };
        let (mut detector, mut ts) = calibrated(config, 0.30);
        for _ in 0..2 {
            detector.update(0.05, ts);
            ts += 100.0;
            detector.update(0.30, ts);
            ts += 1_000.0;
        }
        assert!((detector.blink_rate(ts) - 0.2).abs() < 1e-12);
        assert_eq!(detector.blink_rate(ts + 20_000.0), 0.0);
        assert_eq!(detector.blink_count(), 2);
    }

    #[test]
    fn non_finite_samples_do_not_affect_calibration() {
        let config = BlinkConfig {
            calibration_frames: 2,
            ..BlinkConfig::default()
        };
        let mut detector = BlinkDetector::new(config);
        detector.update(f64::NAN, 0.0);
        detector.update(0.3, 10.0);
        assert!(!detector.is_calibrated());
        detector.update(0.3, 20.0);
        assert!(detector.is_calibrated());
        assert!((detector.baseline().unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn bands_follow_configured_cut_points() {
        let bands = BlinkBandConfig::default();
        assert_eq!(BlinkBand::classify(0.05, &bands), BlinkBand::Drowsy);
        assert_eq!(BlinkBand::classify(0.12, &bands), BlinkBand::Low);
        assert_eq!(BlinkBand::classify(0.20, &bands), BlinkBand::Normal);
        assert_eq!(BlinkBand::classify(0.30, &bands), BlinkBand::Elevated);
        assert_eq!(BlinkBand::classify(0.50, &bands), BlinkBand::Stressed);
    }
}
