//! Dual-mode engagement classifier.
//!
//! The strategy is picked once at construction: a valid model artifact gives
//! `Trained`, anything else gives `RuleBased`. A failed load is remembered as
//! the degradation so callers can tell the user they are running on rules.

pub mod rule_based;
pub mod trained;

use std::path::Path;
use std::sync::Arc;

use crate::engagement::config::RuleConfig;
use crate::engagement::error::ModelArtifactError;
use crate::engagement::features::FeatureVector;
use crate::engagement::types::{ClassifierMode, EngagementResult};

pub use rule_based::RuleBasedClassifier;
pub use trained::{ModelArtifact, TrainedClassifier, ARTIFACT_FORMAT_VERSION};

#[derive(Debug, Clone)]
pub enum Strategy {
    Trained(TrainedClassifier),
    RuleBased(RuleBasedClassifier),
}

#[derive(Debug, Clone)]
pub struct EngagementClassifier {
    strategy: Strategy,
    degradation: Option<ModelArtifactError>,
}

impl EngagementClassifier {
    /// Rule-based by choice; not degraded.
    pub fn rule_based(rules: RuleConfig) -> Self {
        Self {
            strategy: Strategy::RuleBased(RuleBasedClassifier::new(rules)),
            degradation: None,
        }
    }

    pub fn trained(artifact: Arc<ModelArtifact>) -> Result<Self, ModelArtifactError> {
        Ok(Self {
            strategy: Strategy::Trained(TrainedClassifier::new(artifact)?),
            degradation: None,
        })
    }

    /// Load the artifact at `path`, falling back to rules on any artifact
    /// error. Never fails.
    pub fn load(path: impl AsRef<Path>, rules: RuleConfig) -> Self {
        let path = path.as_ref();
        match ModelArtifact::load(path) {
            Ok(artifact) => {
                tracing::info!(
                    path = %path.display(),
                    algorithm = %artifact.algorithm,
                    trees = artifact.trees.len(),
                    validation_accuracy = ?artifact.validation_accuracy,
                    "Engagement model loaded"
                );
                Self::from_artifact(Arc::new(artifact), rules)
            }
            Err(e) => Self::degraded(e, rules),
        }
    }

    pub fn from_artifact(artifact: Arc<ModelArtifact>, rules: RuleConfig) -> Self {
        match Self::trained(artifact) {
            Ok(classifier) => classifier,
            Err(e) => Self::degraded(e, rules),
        }
    }

    fn degraded(error: ModelArtifactError, rules: RuleConfig) -> Self {
        tracing::warn!(error = %error, "Engagement model unavailable, falling back to rule-based classifier");
        Self {
            strategy: Strategy::RuleBased(RuleBasedClassifier::new(rules)),
            degradation: Some(error),
        }
    }

    pub fn classify(&self, features: &FeatureVector) -> EngagementResult {
        match &self.strategy {
            Strategy::Trained(model) => model.classify(features),
            Strategy::RuleBased(rules) => rules.classify(features),
        }
    }

    pub fn mode(&self) -> ClassifierMode {
        match self.strategy {
            Strategy::Trained(_) => ClassifierMode::Trained,
            Strategy::RuleBased(_) => ClassifierMode::RuleBased,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    pub fn degradation(&self) -> Option<&ModelArtifactError> {
        self.degradation.as_ref()
    }
}
