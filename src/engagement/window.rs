//! Time-bounded sliding windows and the statistics computed over them.
//!
//! Windows keep raw `(timestamp, value)` samples and every statistic is
//! recomputed from them on request, so there is no running sum to drift.
//! Empty windows report zeros.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engagement::config::WindowConfig;
use crate::engagement::types::GazeReading;

/// Ordered `(timestamp_ms, value)` samples covering a trailing time span.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    samples: VecDeque<(f64, T)>,
    span_ms: f64,
    capacity: usize,
}

impl<T: Copy> SlidingWindow<T> {
    pub fn new(span_ms: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(256)),
            span_ms,
            capacity,
        }
    }

    /// Evict stale samples relative to `timestamp_ms`, then append.
    ///
    /// Returns `false` (and stores nothing) when the sample is older than the
    /// newest stored one; the window never reorders.
    pub fn push(&mut self, timestamp_ms: f64, value: T) -> bool {
        if !timestamp_ms.is_finite() {
            return false;
        }
        if let Some(&(last_ts, _)) = self.samples.back() {
            if timestamp_ms < last_ts {
                return false;
            }
        }

        self.evict_before(timestamp_ms - self.span_ms);
        self.samples.push_back((timestamp_ms, value));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    /// Drop samples older than the trailing span as seen from `now_ms`.
    pub fn advance_to(&mut self, now_ms: f64) {
        self.evict_before(now_ms - self.span_ms);
    }

    fn evict_before(&mut self, cutoff: f64) {
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn span_ms(&self) -> f64 {
        self.span_ms
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.samples.front().map(|(ts, _)| *ts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, T)> {
        self.samples.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = T> + '_ {
        self.samples.iter().map(|(_, v)| *v)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl SlidingWindow<f64> {
    pub fn stats(&self) -> WindowStats {
        WindowStats::from_values(self.values().collect())
    }
}

impl SlidingWindow<bool> {
    /// Fraction of `true` samples; 0 when empty.
    pub fn true_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let hits = self.values().filter(|v| *v).count();
        hits as f64 / self.samples.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

impl WindowStats {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            count: values.len(),
            mean,
            std: variance.sqrt(),
            min: values[0],
            max: values[values.len() - 1],
            p25: percentile_sorted(&values, 25.0),
            p50: percentile_sorted(&values, 50.0),
            p75: percentile_sorted(&values, 75.0),
        }
    }

    /// The seven values in feature order: mean, std, min, max, p25, p50, p75.
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.mean, self.std, self.min, self.max, self.p25, self.p50, self.p75,
        ]
    }
}

/// Linear interpolation between closest ranks: rank = p/100 * (n - 1).
///
/// `sorted` must be ascending. Returns 0 for an empty slice.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// Bounded stability measure in (0, 1]; higher is steadier.
pub fn stability(std: f64) -> f64 {
    if std.is_nan() {
        return f64::MIN_POSITIVE;
    }
    (1.0 / (1.0 + std.max(0.0))).max(f64::MIN_POSITIVE)
}

/// Rolling windows for every per-frame signal of one session.
#[derive(Debug, Clone)]
pub struct TemporalAggregator {
    pitch: SlidingWindow<f64>,
    yaw: SlidingWindow<f64>,
    deviation: SlidingWindow<f64>,
    ear: SlidingWindow<f64>,
    presence: SlidingWindow<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub pitch: WindowStats,
    pub yaw: WindowStats,
    pub gaze_deviation: WindowStats,
    pub ear: WindowStats,
    pub face_ratio: f64,
    pub pitch_stability: f64,
    pub yaw_stability: f64,
}

impl TemporalAggregator {
    pub fn new(config: &WindowConfig) -> Self {
        let span_ms = config.span_seconds * 1000.0;
        Self {
            pitch: SlidingWindow::new(span_ms, config.capacity),
            yaw: SlidingWindow::new(span_ms, config.capacity),
            deviation: SlidingWindow::new(span_ms, config.capacity),
            ear: SlidingWindow::new(span_ms, config.capacity),
            presence: SlidingWindow::new(span_ms, config.capacity),
        }
    }

    /// Record one processed frame. Presence is always recorded; gaze and EAR
    /// only when the frame produced them.
    pub fn record_frame(&mut self, timestamp_ms: f64, gaze: Option<GazeReading>, ear: Option<f64>) {
        let face_present = gaze.is_some() || ear.is_some();
        self.presence.push(timestamp_ms, face_present);

        if let Some(g) = gaze {
            self.pitch.push(timestamp_ms, g.pitch);
            self.yaw.push(timestamp_ms, g.yaw);
            self.deviation.push(timestamp_ms, g.deviation());
        } else {
            self.pitch.advance_to(timestamp_ms);
            self.yaw.advance_to(timestamp_ms);
            self.deviation.advance_to(timestamp_ms);
        }

        match ear {
            Some(value) if value.is_finite() => {
                self.ear.push(timestamp_ms, value);
            }
            _ => self.ear.advance_to(timestamp_ms),
        }
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let pitch = self.pitch.stats();
        let yaw = self.yaw.stats();
        AggregateSnapshot {
            pitch,
            yaw,
            gaze_deviation: self.deviation.stats(),
            ear: self.ear.stats(),
            face_ratio: self.presence.true_ratio(),
            pitch_stability: stability(pitch.std),
            yaw_stability: stability(yaw.std),
        }
    }

    /// Processed frames (with or without a face) inside the window.
    pub fn frames_in_window(&self) -> usize {
        self.presence.len()
    }

    pub fn reset(&mut self) {
        self.pitch.clear();
        self.yaw.clear();
        self.deviation.clear();
        self.ear.clear();
        self.presence.clear();
    }
}
