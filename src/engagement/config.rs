use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionPolicy {
    /// Nearest subject wins; confidence breaks ties.
    LargestArea,
    /// Most confident detection wins; area breaks ties.
    HighestConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceConfig {
    pub min_confidence: f64,
    pub selection: SelectionPolicy,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            selection: SelectionPolicy::LargestArea,
        }
    }
}

/// Bin layout of the gaze regression head. Must match between the weights
/// file and the running configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GazeModelConfig {
    pub bin_count: usize,
    pub bin_width: f64,
    pub angle_range: f64,
}

impl Default for GazeModelConfig {
    fn default() -> Self {
        Self {
            bin_count: 90,
            bin_width: 4.0,
            angle_range: 180.0,
        }
    }
}

impl std::fmt::Display for GazeModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bins x {} deg (+/-{} deg)",
            self.bin_count, self.bin_width, self.angle_range
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GazeConfig {
    pub model: GazeModelConfig,
    /// Side length of the pooled input grid.
    pub input_size: usize,
    /// Width of the Gaussian used by the built-in gradient model (degrees).
    #[serde(default = "default_prior_sigma_deg")]
    pub prior_sigma_deg: f64,
}

fn default_prior_sigma_deg() -> f64 {
    8.0
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            model: GazeModelConfig::default(),
            input_size: 8,
            prior_sigma_deg: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkConfig {
    /// Face-visible frames needed before blinks are counted.
    pub calibration_frames: usize,
    /// Threshold = baseline × sensitivity; lower values close less readily.
    pub sensitivity: f64,
    pub hysteresis: f64,
    pub min_blink_ms: f64,
    pub max_blink_ms: f64,
    pub rate_window_seconds: f64,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            calibration_frames: 50,
            sensitivity: 0.80,
            hysteresis: 0.05,
            min_blink_ms: 50.0,
            max_blink_ms: 500.0,
            rate_window_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowConfig {
    pub span_seconds: f64,
    pub capacity: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            span_seconds: 10.0,
            capacity: 1024,
        }
    }
}

/// Blink-rate bands in blinks per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkBandConfig {
    pub drowsy_below: f64,
    pub normal_min: f64,
    pub normal_max: f64,
    pub stressed_above: f64,
}

impl Default for BlinkBandConfig {
    fn default() -> Self {
        Self {
            drowsy_below: 0.10,
            normal_min: 0.15,
            normal_max: 0.25,
            stressed_above: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub min_face_ratio: f64,
    pub face_ratio_cuts: [f64; 3],
    pub gaze_deviation_cuts: [f64; 3],
    pub stability_cuts: [f64; 3],
    pub blink_bands: BlinkBandConfig,
    pub weight_face: f64,
    pub weight_gaze: f64,
    pub weight_stability: f64,
    pub weight_blink: f64,
    /// Score cut points for levels 1, 2 and 3; anything lower is level 4.
    pub level_cuts: [f64; 3],
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_face_ratio: 0.30,
            face_ratio_cuts: [0.90, 0.70, 0.40],
            gaze_deviation_cuts: [0.5, 1.0, 1.5],
            stability_cuts: [0.5, 0.25, 0.125],
            blink_bands: BlinkBandConfig::default(),
            weight_face: 0.35,
            weight_gaze: 0.30,
            weight_stability: 0.20,
            weight_blink: 0.15,
            level_cuts: [85.0, 60.0, 35.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub report_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { report_buffer: 64 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementConfig {
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub gaze: GazeConfig,
    #[serde(default)]
    pub blink: BlinkConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn is_descending(cuts: &[f64; 3]) -> bool {
    cuts[0] > cuts[1] && cuts[1] > cuts[2]
}

fn is_ascending(cuts: &[f64; 3]) -> bool {
    cuts[0] < cuts[1] && cuts[1] < cuts[2]
}

impl EngagementConfig {
    pub fn from_env(env_config: &crate::config::EngagementEnvConfig) -> Result<Self, String> {
        let mut config = match &env_config.config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(window) = env_config.window_seconds {
            config.window.span_seconds = window;
            config.blink.rate_window_seconds = window;
        }
        if let Some(frames) = env_config.calibration_frames {
            config.blink.calibration_frames = frames;
        }
        if let Some(sensitivity) = env_config.blink_sensitivity {
            config.blink.sensitivity = sensitivity;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    /// Every float knob, by config path.
    fn float_fields(&self) -> Vec<(String, f64)> {
        let rules = &self.rules;
        let bands = &rules.blink_bands;
        let mut fields = vec![
            ("face.min_confidence".to_string(), self.face.min_confidence),
            ("gaze.model.bin_width".to_string(), self.gaze.model.bin_width),
            ("gaze.model.angle_range".to_string(), self.gaze.model.angle_range),
            ("gaze.prior_sigma_deg".to_string(), self.gaze.prior_sigma_deg),
            ("blink.sensitivity".to_string(), self.blink.sensitivity),
            ("blink.hysteresis".to_string(), self.blink.hysteresis),
            ("blink.min_blink_ms".to_string(), self.blink.min_blink_ms),
            ("blink.max_blink_ms".to_string(), self.blink.max_blink_ms),
            ("blink.rate_window_seconds".to_string(), self.blink.rate_window_seconds),
            ("window.span_seconds".to_string(), self.window.span_seconds),
            ("rules.min_face_ratio".to_string(), rules.min_face_ratio),
            ("rules.blink_bands.drowsy_below".to_string(), bands.drowsy_below),
            ("rules.blink_bands.normal_min".to_string(), bands.normal_min),
            ("rules.blink_bands.normal_max".to_string(), bands.normal_max),
            ("rules.blink_bands.stressed_above".to_string(), bands.stressed_above),
            ("rules.weight_face".to_string(), rules.weight_face),
            ("rules.weight_gaze".to_string(), rules.weight_gaze),
            ("rules.weight_stability".to_string(), rules.weight_stability),
            ("rules.weight_blink".to_string(), rules.weight_blink),
        ];
        for (name, cuts) in [
            ("rules.face_ratio_cuts", &rules.face_ratio_cuts),
            ("rules.gaze_deviation_cuts", &rules.gaze_deviation_cuts),
            ("rules.stability_cuts", &rules.stability_cuts),
            ("rules.level_cuts", &rules.level_cuts),
        ] {
            fields.extend(cuts.iter().enumerate().map(|(i, v)| (format!("{name}[{i}]"), *v)));
        }
        fields
    }

    pub fn validate(&self) -> Result<(), String> {
        // NaN slips through every ordered comparison below.
        if let Some((name, value)) = self.float_fields().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{name} must be finite (got {value})"));
        }

        if !(0.0..=1.0).contains(&self.face.min_confidence) {
            return Err("face.min_confidence must be in [0,1]".to_string());
        }

        // GazeConfig
        if self.gaze.model.bin_count < 2 {
            return Err("gaze.model.bin_count must be >= 2".to_string());
        }
        if self.gaze.model.bin_width <= 0.0 {
            return Err("gaze.model.bin_width must be > 0".to_string());
        }
        if self.gaze.model.angle_range <= 0.0 {
            return Err("gaze.model.angle_range must be > 0".to_string());
        }
        let covered = self.gaze.model.bin_count as f64 * self.gaze.model.bin_width;
        if covered + 1e-9 < 2.0 * 90.0 {
            return Err(format!(
                "gaze bins must cover at least +/-90 deg (cover {covered:.1} deg)"
            ));
        }
        if self.gaze.input_size < 2 || self.gaze.input_size % 2 != 0 {
            return Err("gaze.input_size must be an even number >= 2".to_string());
        }
        if self.gaze.prior_sigma_deg <= 0.0 {
            return Err("gaze.prior_sigma_deg must be > 0".to_string());
        }

        // BlinkConfig
        if self.blink.calibration_frames == 0 {
            return Err("blink.calibration_frames must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.blink.sensitivity) || self.blink.sensitivity == 0.0 {
            return Err("blink.sensitivity must be in (0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.blink.hysteresis) {
            return Err("blink.hysteresis must be in [0,1]".to_string());
        }
        if self.blink.min_blink_ms < 0.0 || self.blink.max_blink_ms <= self.blink.min_blink_ms {
            return Err("blink.max_blink_ms must be > blink.min_blink_ms >= 0".to_string());
        }
        if self.blink.rate_window_seconds <= 0.0 {
            return Err("blink.rate_window_seconds must be > 0".to_string());
        }

        // WindowConfig
        if self.window.span_seconds <= 0.0 {
            return Err("window.span_seconds must be > 0".to_string());
        }
        if self.window.capacity == 0 {
            return Err("window.capacity must be > 0".to_string());
        }

        // RuleConfig
        let rules = &self.rules;
        if !(0.0..=1.0).contains(&rules.min_face_ratio) {
            return Err("rules.min_face_ratio must be in [0,1]".to_string());
        }
        if !is_descending(&rules.face_ratio_cuts) {
            return Err("rules.face_ratio_cuts must be strictly descending".to_string());
        }
        if !is_ascending(&rules.gaze_deviation_cuts) {
            return Err("rules.gaze_deviation_cuts must be strictly ascending".to_string());
        }
        if !is_descending(&rules.stability_cuts) {
            return Err("rules.stability_cuts must be strictly descending".to_string());
        }
        if !is_descending(&rules.level_cuts) {
            return Err("rules.level_cuts must be strictly descending".to_string());
        }
        let bands = &rules.blink_bands;
        if !(bands.drowsy_below <= bands.normal_min
            && bands.normal_min < bands.normal_max
            && bands.normal_max <= bands.stressed_above)
        {
            return Err("rules.blink_bands must be ordered drowsy <= normal < stressed".to_string());
        }
        let weights = [
            rules.weight_face,
            rules.weight_gaze,
            rules.weight_stability,
            rules.weight_blink,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err("rules weights must be >= 0".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(format!("rules weights should sum to ~1.0 (got {sum:.3})"));
        }

        if self.runtime.report_buffer == 0 {
            return Err("runtime.report_buffer must be > 0".to_string());
        }

        Ok(())
    }
}
