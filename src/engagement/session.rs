//! Per-frame session history and the end-of-session summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engagement::blink::BlinkBand;
use crate::engagement::pipeline::FrameReport;
use crate::engagement::types::{ClassifierMode, EngagementLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub face_detected: bool,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub ear: Option<f64>,
    pub blink_rate: Option<f64>,
    pub blink_band: Option<BlinkBand>,
    pub level: EngagementLevel,
    pub confidence: f64,
}

impl From<&FrameReport> for FrameRecord {
    fn from(report: &FrameReport) -> Self {
        Self {
            frame_index: report.frame_index,
            timestamp_ms: report.timestamp_ms,
            face_detected: report.face_detected,
            pitch: report.gaze.map(|g| g.pitch),
            yaw: report.gaze.map(|g| g.yaw),
            ear: report.ear,
            blink_rate: report.blink.blink_rate(),
            blink_band: report.blink_band,
            level: report.result.level,
            confidence: report.result.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelShare {
    pub level: EngagementLevel,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub faces_detected: u64,
    pub total_blinks: u64,
    pub distribution: Vec<LevelShare>,
    pub average_confidence: f64,
    /// (H·100 + E·70 + P·40 + D·10) / frames, 0-100.
    pub engagement_score: f64,
    pub classifier_mode: ClassifierMode,
    pub degraded: bool,
}

impl SessionSummary {
    pub fn share(&self, level: EngagementLevel) -> Option<&LevelShare> {
        self.distribution.iter().find(|s| s.level == level)
    }

    /// Most frequent level; ties go to the more engaged one.
    pub fn dominant_level(&self) -> Option<EngagementLevel> {
        self.distribution
            .iter()
            .filter(|s| s.count > 0)
            .max_by(|a, b| a.count.cmp(&b.count).then(b.level.cmp(&a.level)))
            .map(|s| s.level)
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecorder {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    records: Vec<FrameRecord>,
    frames_dropped: u64,
    total_blinks: u64,
    mode: ClassifierMode,
    degraded: bool,
}

impl SessionRecorder {
    pub fn new(mode: ClassifierMode, degraded: bool) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            records: Vec::new(),
            frames_dropped: 0,
            total_blinks: 0,
            mode,
            degraded,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn record(&mut self, report: &FrameReport) {
        if report.blinked() {
            self.total_blinks += 1;
        }
        self.records.push(FrameRecord::from(report));
    }

    pub fn note_dropped(&mut self, frames: u64) {
        self.frames_dropped += frames;
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn summary(&self) -> SessionSummary {
        let total = self.records.len() as u64;
        let mut counts = [0u64; 4];
        for r in &self.records {
            counts[(r.level.as_u8() - 1) as usize] += 1;
        }

        let distribution = EngagementLevel::ALL
            .iter()
            .zip(counts)
            .map(|(level, count)| LevelShare {
                level: *level,
                count,
                percentage: percentage(count, total),
            })
            .collect();

        let (average_confidence, engagement_score) = if total == 0 {
            (0.0, 0.0)
        } else {
            let confidence = self.records.iter().map(|r| r.confidence).sum::<f64>() / total as f64;
            let points: f64 = EngagementLevel::ALL
                .iter()
                .zip(counts)
                .map(|(level, count)| level.points() * count as f64)
                .sum();
            (confidence, points / total as f64)
        };

        let duration_seconds = match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => ((last.timestamp_ms - first.timestamp_ms) / 1000.0).max(0.0),
            _ => 0.0,
        };

        SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            duration_seconds,
            frames_processed: total,
            frames_dropped: self.frames_dropped,
            faces_detected: self.records.iter().filter(|r| r.face_detected).count() as u64,
            total_blinks: self.total_blinks,
            distribution,
            average_confidence,
            engagement_score,
            classifier_mode: self.mode,
            degraded: self.degraded,
        }
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}
