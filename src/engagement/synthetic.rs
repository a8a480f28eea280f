//! Seeded synthetic viewer sessions.
//!
//! A scenario is a list of segments (visible or not, head pose, jitter,
//! blink rate). Rendering produces luma frames whose face crop is shaded
//! with the same gradient the built-in gaze model reads, plus the detections
//! a landmark detector would report for them. Same seed, same frames.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::engagement::error::DetectorError;
use crate::engagement::face::FaceDetector;
use crate::engagement::gaze::PRIOR_GRADIENT_AMPLITUDE;
use crate::engagement::types::{BoundingBox, EyeLandmarks, FaceRegion, Frame, Point};

const OPEN_EAR: f64 = 0.30;
const CLOSED_EAR: f64 = 0.08;
const BLINK_MS: f64 = 150.0;
const BACKGROUND_LUMA: f64 = 60.0;
const FACE_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSegment {
    pub duration_seconds: f64,
    pub face_visible: bool,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    /// Uniform per-frame pose jitter, +/- degrees.
    pub jitter_deg: f64,
    pub blinks_per_second: f64,
}

impl ScenarioSegment {
    pub fn attentive(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            face_visible: true,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            jitter_deg: 1.0,
            blinks_per_second: 0.2,
        }
    }

    pub fn looking_away(duration_seconds: f64, yaw_deg: f64) -> Self {
        Self {
            duration_seconds,
            face_visible: true,
            pitch_deg: 10.0,
            yaw_deg,
            jitter_deg: 12.0,
            blinks_per_second: 0.4,
        }
    }

    pub fn absent(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            face_visible: false,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            jitter_deg: 0.0,
            blinks_per_second: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticScenario {
    pub seed: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub segments: Vec<ScenarioSegment>,
}

/// Rendered frames plus the per-frame detections for them.
#[derive(Debug, Clone)]
pub struct SyntheticSession {
    pub frames: Vec<Frame>,
    pub detector: ScriptedDetector,
}

impl SyntheticScenario {
    pub fn new(seed: u64, fps: f64, segments: Vec<ScenarioSegment>) -> Self {
        Self {
            seed,
            fps,
            width: 160,
            height: 120,
            segments,
        }
    }

    /// Attentive, then distracted, then away from the screen, then back.
    pub fn classroom(seed: u64, fps: f64, seconds: f64) -> Self {
        let quarter = seconds / 4.0;
        Self::new(
            seed,
            fps,
            vec![
                ScenarioSegment::attentive(quarter),
                ScenarioSegment::looking_away(quarter, 40.0),
                ScenarioSegment::absent(quarter),
                ScenarioSegment::attentive(quarter),
            ],
        )
    }

    pub fn total_frames(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| (s.duration_seconds * self.fps).round().max(0.0) as u64)
            .sum()
    }

    pub fn render(&self) -> SyntheticSession {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let frame_ms = 1000.0 / self.fps;
        let mut frames = Vec::with_capacity(self.total_frames() as usize);
        let mut faces = HashMap::new();
        let mut index = 0u64;

        for segment in &self.segments {
            let count = (segment.duration_seconds * self.fps).round().max(0.0) as u64;
            let mut next_blink_ms = index as f64 * frame_ms + blink_interval(&mut rng, segment);
            let mut blink_until_ms = f64::NEG_INFINITY;

            for _ in 0..count {
                let ts = index as f64 * frame_ms;
                if !segment.face_visible {
                    frames.push(self.render_background(&mut rng, index, ts));
                    index += 1;
                    continue;
                }

                if ts >= next_blink_ms {
                    blink_until_ms = ts + BLINK_MS;
                    next_blink_ms = ts + blink_interval(&mut rng, segment);
                }
                let ear = if ts < blink_until_ms {
                    CLOSED_EAR
                } else {
                    OPEN_EAR + rng.gen_range(-0.01..=0.01)
                };

                let pitch = segment.pitch_deg + jitter(&mut rng, segment.jitter_deg);
                let yaw = segment.yaw_deg + jitter(&mut rng, segment.jitter_deg);
                let bbox = self.face_box(&mut rng);
                frames.push(self.render_face(&mut rng, index, ts, &bbox, pitch, yaw));
                faces.insert(index, face_region(&bbox, ear));
                index += 1;
            }
        }

        SyntheticSession {
            frames,
            detector: ScriptedDetector::new(faces),
        }
    }

    fn face_box(&self, rng: &mut StdRng) -> BoundingBox {
        let cx = self.width.saturating_sub(FACE_SIZE) / 2;
        let cy = self.height.saturating_sub(FACE_SIZE) / 2;
        let dx: i32 = rng.gen_range(-3..=3);
        let dy: i32 = rng.gen_range(-3..=3);
        BoundingBox::new(
            (cx as i32 + dx).max(0) as f64,
            (cy as i32 + dy).max(0) as f64,
            FACE_SIZE.min(self.width) as f64,
            FACE_SIZE.min(self.height) as f64,
        )
    }

    fn render_background(&self, rng: &mut StdRng, index: u64, ts: f64) -> Frame {
        let pixels = (0..self.width * self.height)
            .map(|_| (BACKGROUND_LUMA + rng.gen_range(-4.0..=4.0)).round() as u8)
            .collect();
        Frame::new(index, ts, self.width, self.height, pixels)
    }

    fn render_face(
        &self,
        rng: &mut StdRng,
        index: u64,
        ts: f64,
        bbox: &BoundingBox,
        pitch: f64,
        yaw: f64,
    ) -> Frame {
        let mut frame = self.render_background(rng, index, ts);
        let (x0, y0) = (bbox.x as u32, bbox.y as u32);
        let (w, h) = (bbox.width as u32, bbox.height as u32);
        for y in y0..(y0 + h).min(self.height) {
            for x in x0..(x0 + w).min(self.width) {
                let xr = 2.0 * ((x - x0) as f64 + 0.5) / bbox.width - 1.0;
                let yr = 2.0 * ((y - y0) as f64 + 0.5) / bbox.height - 1.0;
                let v = 128.0
                    + PRIOR_GRADIENT_AMPLITUDE * (yaw / 90.0) * xr
                    + PRIOR_GRADIENT_AMPLITUDE * (pitch / 90.0) * yr
                    + rng.gen_range(-2.0..=2.0);
                frame.pixels[(y * self.width + x) as usize] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        frame
    }
}

fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

/// Blinks are roughly periodic: the nominal interval +/- 20%.
fn blink_interval(rng: &mut StdRng, segment: &ScenarioSegment) -> f64 {
    if segment.blinks_per_second <= 0.0 {
        return f64::INFINITY;
    }
    let nominal = 1000.0 / segment.blinks_per_second;
    nominal * rng.gen_range(0.8..=1.2)
}

/// Landmarks for both eyes with the requested aspect ratio.
fn face_region(bbox: &BoundingBox, ear: f64) -> FaceRegion {
    let eye = |cx: f64, cy: f64| {
        let w = bbox.width * 0.2;
        let h = ear * w;
        EyeLandmarks([
            Point::new(cx - w / 2.0, cy),
            Point::new(cx - w / 6.0, cy - h / 2.0),
            Point::new(cx + w / 6.0, cy - h / 2.0),
            Point::new(cx + w / 2.0, cy),
            Point::new(cx + w / 6.0, cy + h / 2.0),
            Point::new(cx - w / 6.0, cy + h / 2.0),
        ])
    };
    let eye_y = bbox.y + bbox.height * 0.4;
    FaceRegion {
        bbox: *bbox,
        confidence: 0.95,
        left_eye: eye(bbox.x + bbox.width * 0.3, eye_y),
        right_eye: eye(bbox.x + bbox.width * 0.7, eye_y),
    }
}

/// Replays fixed detections by frame index.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    faces: HashMap<u64, FaceRegion>,
    failing: Vec<u64>,
}

impl ScriptedDetector {
    pub fn new(faces: HashMap<u64, FaceRegion>) -> Self {
        Self {
            faces,
            failing: Vec::new(),
        }
    }

    /// Make the detector error on the given frame indices.
    pub fn fail_on(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(indices);
        self
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
        if self.failing.contains(&frame.index) {
            return Err(DetectorError::Backend(format!(
                "scripted failure on frame {}",
                frame.index
            )));
        }
        Ok(self.faces.get(&frame.index).cloned().into_iter().collect())
    }
}
