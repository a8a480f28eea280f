use serde::{Deserialize, Serialize};

/// Pitch (degrees) beyond which the viewer is treated as looking off screen.
pub const SCREEN_PITCH_LIMIT_DEG: f64 = 12.0;
/// Yaw (degrees) beyond which the viewer is treated as looking off screen.
pub const SCREEN_YAW_LIMIT_DEG: f64 = 15.0;

/// A raw luma frame handed over by the video source.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position in the stream, starting at 0.
    pub index: u64,
    pub timestamp_ms: f64,
    pub width: u32,
    pub height: u32,
    /// 8-bit luma, row-major, `width * height` bytes.
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, timestamp_ms: f64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp_ms,
            width,
            height,
            pixels,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize
    }

    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        if self.width <= 0.0 || self.height <= 0.0 {
            0.0
        } else {
            self.width * self.height
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Six eye landmarks in the usual EAR order:
/// p1/p4 are the corners, p2/p3 the upper lid, p5/p6 the lower lid.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeLandmarks(pub [Point; 6]);

impl EyeLandmarks {
    pub fn points(&self) -> &[Point; 6] {
        &self.0
    }
}

/// The primary face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub left_eye: EyeLandmarks,
    pub right_eye: EyeLandmarks,
}

/// Head pose in degrees. Positive pitch is head down, positive yaw is head right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeReading {
    pub pitch: f64,
    pub yaw: f64,
}

impl GazeReading {
    pub fn new(pitch: f64, yaw: f64) -> Self {
        Self {
            pitch: pitch.clamp(-90.0, 90.0),
            yaw: yaw.clamp(-90.0, 90.0),
        }
    }

    pub fn looking_at_screen(&self) -> bool {
        self.pitch.abs() < SCREEN_PITCH_LIMIT_DEG && self.yaw.abs() < SCREEN_YAW_LIMIT_DEG
    }

    /// Off-screen deviation: elliptical distance from straight ahead,
    /// normalized so the on-screen limits sit at roughly 1.0.
    pub fn deviation(&self) -> f64 {
        ((self.pitch / SCREEN_PITCH_LIMIT_DEG).powi(2) + (self.yaw / SCREEN_YAW_LIMIT_DEG).powi(2))
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngagementLevel {
    HighlyEngaged = 1,
    Engaged = 2,
    PartiallyEngaged = 3,
    Disengaged = 4,
}

impl EngagementLevel {
    pub const ALL: [EngagementLevel; 4] = [
        Self::HighlyEngaged,
        Self::Engaged,
        Self::PartiallyEngaged,
        Self::Disengaged,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::HighlyEngaged),
            2 => Some(Self::Engaged),
            3 => Some(Self::PartiallyEngaged),
            4 => Some(Self::Disengaged),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Points used by the weighted engagement score.
    pub fn points(self) -> f64 {
        match self {
            Self::HighlyEngaged => 100.0,
            Self::Engaged => 70.0,
            Self::PartiallyEngaged => 40.0,
            Self::Disengaged => 10.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighlyEngaged => "highly_engaged",
            Self::Engaged => "engaged",
            Self::PartiallyEngaged => "partially_engaged",
            Self::Disengaged => "disengaged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifierMode {
    Trained,
    RuleBased,
}

impl ClassifierMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trained => "trained",
            Self::RuleBased => "rule_based",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureContribution {
    pub name: String,
    pub value: f64,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementResult {
    pub level: EngagementLevel,
    pub confidence: f64,
    /// Weighted 0-100 score for the rule-based path, probability-weighted
    /// points for the trained path.
    pub score: f64,
    pub mode: ClassifierMode,
    pub contributing_features: Vec<FeatureContribution>,
}
