//! The fixed-order feature vector consumed by both classifier modes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engagement::blink::BlinkStatus;
use crate::engagement::window::AggregateSnapshot;

pub const FEATURE_COUNT: usize = 19;

/// Bumped whenever `FEATURE_NAMES` changes order or meaning.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "gaze_dev_mean",
    "gaze_dev_std",
    "gaze_dev_min",
    "gaze_dev_max",
    "gaze_dev_p25",
    "gaze_dev_p50",
    "gaze_dev_p75",
    "ear_mean",
    "ear_std",
    "ear_min",
    "ear_max",
    "ear_p25",
    "ear_p50",
    "ear_p75",
    "blink_count",
    "blink_rate",
    "face_ratio",
    "pitch_stab",
    "yaw_stab",
];

pub const IDX_GAZE_DEV_MEAN: usize = 0;
pub const IDX_BLINK_COUNT: usize = 14;
pub const IDX_BLINK_RATE: usize = 15;
pub const IDX_FACE_RATIO: usize = 16;
pub const IDX_PITCH_STAB: usize = 17;
pub const IDX_YAW_STAB: usize = 18;

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Hex SHA-256 over the schema version and the comma-joined names.
pub fn schema_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(FEATURE_SCHEMA_VERSION.to_le_bytes());
    hasher.update(FEATURE_NAMES.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
    /// Blink features carry meaning only once calibration has finished.
    blink_ready: bool,
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT], blink_ready: bool) -> Self {
        Self {
            values,
            blink_ready,
        }
    }

    /// Assemble the vector from the window snapshot and the blink detector
    /// state at the same timestamp.
    pub fn build(snapshot: &AggregateSnapshot, blink: &BlinkStatus) -> Self {
        let mut values = [0.0; FEATURE_COUNT];
        values[0..7].copy_from_slice(&snapshot.gaze_deviation.as_array());
        values[7..14].copy_from_slice(&snapshot.ear.as_array());

        let blink_ready = match blink {
            BlinkStatus::Active {
                blink_count,
                blink_rate,
                ..
            } => {
                values[IDX_BLINK_COUNT] = *blink_count as f64;
                values[IDX_BLINK_RATE] = *blink_rate;
                true
            }
            BlinkStatus::Calibrating { .. } => false,
        };

        values[IDX_FACE_RATIO] = snapshot.face_ratio;
        values[IDX_PITCH_STAB] = snapshot.pitch_stability;
        values[IDX_YAW_STAB] = snapshot.yaw_stability;

        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        Self {
            values,
            blink_ready,
        }
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }

    pub fn blink_ready(&self) -> bool {
        self.blink_ready
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}
