use crate::engagement::config::{BlinkBandConfig, RuleConfig};
use crate::engagement::features::{
    FeatureVector, IDX_BLINK_RATE, IDX_FACE_RATIO, IDX_GAZE_DEV_MEAN, IDX_PITCH_STAB, IDX_YAW_STAB,
};
use crate::engagement::types::{ClassifierMode, EngagementLevel, EngagementResult, FeatureContribution};

/// Lowest confidence a blended level is reported with.
pub const CONFIDENCE_FLOOR: f64 = 0.2;

/// One criterion's opinion about the current window.
#[derive(Debug, Clone, Copy)]
struct Vote {
    name: &'static str,
    value: f64,
    level: EngagementLevel,
    weight: f64,
}

/// Deterministic threshold classifier. No learned parameters and no state
/// between calls.
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    config: RuleConfig,
}

impl RuleBasedClassifier {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn classify(&self, features: &FeatureVector) -> EngagementResult {
        let cfg = &self.config;
        let face_ratio = features.value(IDX_FACE_RATIO);

        if face_ratio < cfg.min_face_ratio {
            return EngagementResult {
                level: EngagementLevel::Disengaged,
                confidence: (1.0 - face_ratio).clamp(0.5, 1.0),
                score: EngagementLevel::Disengaged.points(),
                mode: ClassifierMode::RuleBased,
                contributing_features: vec![FeatureContribution {
                    name: "face_ratio".to_string(),
                    value: face_ratio,
                    impact: "below_presence_gate".to_string(),
                }],
            };
        }

        let votes = self.votes(features);
        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        let score = if total_weight > 0.0 {
            votes.iter().map(|v| v.weight * v.level.points()).sum::<f64>() / total_weight
        } else {
            0.0
        };
        let level = level_for_score(score, &cfg.level_cuts);

        let agreeing: f64 = votes
            .iter()
            .filter(|v| v.level == level)
            .map(|v| v.weight)
            .sum();
        let agreement = if total_weight > 0.0 {
            (agreeing / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        // Half from criteria that voted this level, half from how deep the
        // score sits inside the level's band.
        let confidence = (0.5 * agreement + 0.5 * band_margin(score, &cfg.level_cuts))
            .clamp(CONFIDENCE_FLOOR, 1.0);

        EngagementResult {
            level,
            confidence,
            score,
            mode: ClassifierMode::RuleBased,
            contributing_features: votes
                .iter()
                .map(|v| FeatureContribution {
                    name: v.name.to_string(),
                    value: v.value,
                    impact: v.level.as_str().to_string(),
                })
                .collect(),
        }
    }

    fn votes(&self, features: &FeatureVector) -> Vec<Vote> {
        let cfg = &self.config;
        let face_ratio = features.value(IDX_FACE_RATIO);
        let gaze_dev = features.value(IDX_GAZE_DEV_MEAN);
        let stability = (features.value(IDX_PITCH_STAB) + features.value(IDX_YAW_STAB)) / 2.0;

        let mut votes = vec![
            Vote {
                name: "face_ratio",
                value: face_ratio,
                level: at_least(face_ratio, &cfg.face_ratio_cuts),
                weight: cfg.weight_face,
            },
            Vote {
                name: "gaze_dev_mean",
                value: gaze_dev,
                level: below(gaze_dev, &cfg.gaze_deviation_cuts),
                weight: cfg.weight_gaze,
            },
            Vote {
                name: "stability",
                value: stability,
                level: at_least(stability, &cfg.stability_cuts),
                weight: cfg.weight_stability,
            },
        ];

        // Blink rate means nothing until the detector has a baseline.
        if features.blink_ready() {
            let rate = features.value(IDX_BLINK_RATE);
            votes.push(Vote {
                name: "blink_rate",
                value: rate,
                level: blink_vote(rate, &cfg.blink_bands),
                weight: cfg.weight_blink,
            });
        }
        votes
    }
}

/// Higher is better: `value >= cuts[0]` is level 1, and so on.
fn at_least(value: f64, cuts: &[f64; 3]) -> EngagementLevel {
    if value >= cuts[0] {
        EngagementLevel::HighlyEngaged
    } else if value >= cuts[1] {
        EngagementLevel::Engaged
    } else if value >= cuts[2] {
        EngagementLevel::PartiallyEngaged
    } else {
        EngagementLevel::Disengaged
    }
}

/// Lower is better: `value < cuts[0]` is level 1, and so on.
fn below(value: f64, cuts: &[f64; 3]) -> EngagementLevel {
    if value < cuts[0] {
        EngagementLevel::HighlyEngaged
    } else if value < cuts[1] {
        EngagementLevel::Engaged
    } else if value < cuts[2] {
        EngagementLevel::PartiallyEngaged
    } else {
        EngagementLevel::Disengaged
    }
}

fn blink_vote(rate: f64, bands: &BlinkBandConfig) -> EngagementLevel {
    if rate < bands.drowsy_below {
        EngagementLevel::Disengaged
    } else if rate > bands.stressed_above {
        EngagementLevel::PartiallyEngaged
    } else if (bands.normal_min..=bands.normal_max).contains(&rate) {
        EngagementLevel::HighlyEngaged
    } else {
        EngagementLevel::Engaged
    }
}

/// Depth of `score` inside its level band: 0 on a cut, 1 at the band centre
/// or at the end of the 10..100 scale for the outer bands.
fn band_margin(score: f64, cuts: &[f64; 3]) -> f64 {
    let top = EngagementLevel::HighlyEngaged.points();
    let bottom = EngagementLevel::Disengaged.points();
    let margin = if score >= cuts[0] {
        (score - cuts[0]) / (top - cuts[0])
    } else if score < cuts[2] {
        (cuts[2] - score) / (cuts[2] - bottom)
    } else {
        let (lo, hi) = if score >= cuts[1] {
            (cuts[1], cuts[0])
        } else {
            (cuts[2], cuts[1])
        };
        (score - lo).min(hi - score) / ((hi - lo) / 2.0)
    };
    if margin.is_finite() {
        margin.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn level_for_score(score: f64, cuts: &[f64; 3]) -> EngagementLevel {
    at_least(score, cuts)
}
