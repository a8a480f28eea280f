//! Inference for a persisted tree-ensemble model.
//!
//! The artifact carries everything inference needs: the feature order it was
//! fitted on, the standard scaler, the class-to-level mapping and the trees.
//! Thresholds live in standardized space.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engagement::error::ModelArtifactError;
use crate::engagement::features::{
    schema_fingerprint, FeatureVector, FEATURE_COUNT, FEATURE_NAMES, FEATURE_SCHEMA_VERSION,
};
use crate::engagement::types::{ClassifierMode, EngagementLevel, EngagementResult, FeatureContribution};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// How many features are reported with each prediction.
const TOP_CONTRIBUTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn transform(&self, values: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut z = [0.0; FEATURE_COUNT];
        for (i, out) in z.iter_mut().enumerate() {
            *out = (values[i] - self.mean[i]) / self.scale[i];
        }
        z
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Leaf reached by `z`. Only valid on a validated tree.
    fn leaf(&self, z: &[f64; FEATURE_COUNT]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if z[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn validate(&self, tree: usize, classes: usize) -> Result<(), ModelArtifactError> {
        let invalid = |msg: String| ModelArtifactError::Invalid(format!("tree {tree}: {msg}"));
        if self.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }
        let count = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(invalid(format!("node {i} uses feature {feature}")));
                    }
                    if !threshold.is_finite() {
                        return Err(invalid(format!("node {i} has a non-finite threshold")));
                    }
                    // Children strictly after their parent keeps every walk finite.
                    for child in [*left, *right] {
                        if child <= i || child >= count {
                            return Err(invalid(format!("node {i} points to node {child}")));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != classes {
                        return Err(invalid(format!(
                            "leaf {i} has {} values for {classes} classes",
                            value.len()
                        )));
                    }
                    if value.iter().any(|v| !v.is_finite() || *v < 0.0) {
                        return Err(invalid(format!("leaf {i} has a negative or non-finite value")));
                    }
                    if value.iter().sum::<f64>() <= 0.0 {
                        return Err(invalid(format!("leaf {i} is empty")));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub format_version: u32,
    pub algorithm: String,
    pub feature_schema_version: u32,
    pub feature_names: Vec<String>,
    /// Optional; checked when present.
    #[serde(default)]
    pub feature_fingerprint: Option<String>,
    pub scaler: FeatureScaler,
    /// Engagement level (1-4) of each probability column.
    pub classes: Vec<u8>,
    pub trees: Vec<DecisionTree>,
    #[serde(default)]
    pub validation_accuracy: Option<f64>,
}

impl ModelArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelArtifactError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelArtifactError::Missing(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ModelArtifactError::Io(format!("{}: {e}", path.display())))?;
        let artifact: Self =
            serde_json::from_str(&raw).map_err(|e| ModelArtifactError::Corrupt(e.to_string()))?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<(), ModelArtifactError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ModelArtifactError::UnsupportedFormat {
                found: self.format_version,
                supported: ARTIFACT_FORMAT_VERSION,
            });
        }
        self.validate_schema()?;

        if self.scaler.mean.len() != FEATURE_COUNT || self.scaler.scale.len() != FEATURE_COUNT {
            return Err(ModelArtifactError::Invalid(format!(
                "scaler has {}/{} entries, expected {FEATURE_COUNT}",
                self.scaler.mean.len(),
                self.scaler.scale.len()
            )));
        }
        if self.scaler.mean.iter().any(|m| !m.is_finite()) {
            return Err(ModelArtifactError::Invalid("scaler mean is not finite".to_string()));
        }
        if self.scaler.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ModelArtifactError::Invalid(
                "scaler scale must be positive and finite".to_string(),
            ));
        }

        if self.classes.is_empty() {
            return Err(ModelArtifactError::Invalid("no classes".to_string()));
        }
        for (i, class) in self.classes.iter().enumerate() {
            if EngagementLevel::from_u8(*class).is_none() {
                return Err(ModelArtifactError::Invalid(format!("class {class} is not a level")));
            }
            if self.classes[..i].contains(class) {
                return Err(ModelArtifactError::Invalid(format!("class {class} listed twice")));
            }
        }

        if self.trees.is_empty() {
            return Err(ModelArtifactError::Invalid("no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, self.classes.len())?;
        }

        if let Some(acc) = self.validation_accuracy {
            if !(0.0..=1.0).contains(&acc) {
                return Err(ModelArtifactError::Invalid(format!(
                    "validation accuracy {acc} outside [0,1]"
                )));
            }
        }
        Ok(())
    }

    fn validate_schema(&self) -> Result<(), ModelArtifactError> {
        if self.feature_schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ModelArtifactError::SchemaMismatch(format!(
                "schema version {} (expected {FEATURE_SCHEMA_VERSION})",
                self.feature_schema_version
            )));
        }
        if self.feature_names.len() != FEATURE_COUNT {
            return Err(ModelArtifactError::SchemaMismatch(format!(
                "{} feature names (expected {FEATURE_COUNT})",
                self.feature_names.len()
            )));
        }
        if let Some((i, (found, expected))) = self
            .feature_names
            .iter()
            .zip(FEATURE_NAMES.iter())
            .enumerate()
            .find(|(_, (found, expected))| found.as_str() != **expected)
        {
            return Err(ModelArtifactError::SchemaMismatch(format!(
                "feature {i} is '{found}', expected '{expected}'"
            )));
        }
        if let Some(fingerprint) = &self.feature_fingerprint {
            if *fingerprint != schema_fingerprint() {
                return Err(ModelArtifactError::SchemaMismatch(
                    "feature fingerprint differs".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    artifact: Arc<ModelArtifact>,
}

impl TrainedClassifier {
    pub fn new(artifact: Arc<ModelArtifact>) -> Result<Self, ModelArtifactError> {
        artifact.validate()?;
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &Arc<ModelArtifact> {
        &self.artifact
    }

    /// Mean of the normalized leaf distributions, one entry per class.
    pub fn predict_proba(&self, features: &FeatureVector) -> Vec<f64> {
        let z = self.artifact.scaler.transform(features.values());
        self.proba_from_z(&z)
    }

    fn proba_from_z(&self, z: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        let classes = self.artifact.classes.len();
        let mut proba = vec![0.0; classes];
        for tree in &self.artifact.trees {
            let leaf = tree.leaf(z);
            let total: f64 = leaf.iter().sum();
            for (p, v) in proba.iter_mut().zip(leaf) {
                *p += v / total;
            }
        }
        let trees = self.artifact.trees.len() as f64;
        for p in proba.iter_mut() {
            *p /= trees;
        }
        proba
    }

    pub fn classify(&self, features: &FeatureVector) -> EngagementResult {
        let z = self.artifact.scaler.transform(features.values());
        let proba = self.proba_from_z(&z);

        // Ties resolve to the lower column.
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        let level = EngagementLevel::from_u8(self.artifact.classes[best])
            .unwrap_or(EngagementLevel::Disengaged);
        let score = proba
            .iter()
            .zip(&self.artifact.classes)
            .map(|(p, c)| p * EngagementLevel::from_u8(*c).map_or(0.0, EngagementLevel::points))
            .sum::<f64>();

        EngagementResult {
            level,
            confidence: proba[best].clamp(0.0, 1.0),
            score,
            mode: ClassifierMode::Trained,
            contributing_features: top_contributions(features, &z),
        }
    }
}

fn top_contributions(features: &FeatureVector, z: &[f64; FEATURE_COUNT]) -> Vec<FeatureContribution> {
    let mut order: Vec<usize> = (0..FEATURE_COUNT).collect();
    order.sort_by(|a, b| z[*b].abs().total_cmp(&z[*a].abs()));
    order
        .into_iter()
        .take(TOP_CONTRIBUTIONS)
        .map(|i| FeatureContribution {
            name: FEATURE_NAMES[i].to_string(),
            value: features.value(i),
            impact: if z[i] >= 0.0 { "above_typical" } else { "below_typical" }.to_string(),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engagement::features::IDX_FACE_RATIO;

    /// A single stump on face_ratio: present viewers are level 1, absent ones level 4.
    pub fn stump_artifact() -> ModelArtifact {
        ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            algorithm: "random_forest".to_string(),
            feature_schema_version: FEATURE_SCHEMA_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            feature_fingerprint: Some(schema_fingerprint()),
            scaler: FeatureScaler {
                mean: vec![0.0; FEATURE_COUNT],
                scale: vec![1.0; FEATURE_COUNT],
            },
            classes: vec![1, 2, 3, 4],
            trees: vec![
                DecisionTree {
                    nodes: vec![
                        TreeNode::Split {
                            feature: IDX_FACE_RATIO,
                            threshold: 0.5,
                            left: 1,
                            right: 2,
                        },
                        TreeNode::Leaf {
                            value: vec![0.0, 0.0, 2.0, 8.0],
                        },
                        TreeNode::Leaf {
                            value: vec![9.0, 1.0, 0.0, 0.0],
                        },
                    ],
                },
                DecisionTree {
                    nodes: vec![TreeNode::Leaf {
                        value: vec![1.0, 1.0, 1.0, 1.0],
                    }],
                },
            ],
            validation_accuracy: Some(0.9),
        }
    }
}
