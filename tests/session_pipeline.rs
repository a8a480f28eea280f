use std::sync::Arc;

use serde_json::json;

use engagement_monitor::engagement::blink::BlinkStatus;
use engagement_monitor::engagement::classifier::EngagementClassifier;
use engagement_monitor::engagement::config::EngagementConfig;
use engagement_monitor::engagement::error::ModelArtifactError;
use engagement_monitor::engagement::face::FaceLocator;
use engagement_monitor::engagement::features::{schema_fingerprint, FEATURE_NAMES};
use engagement_monitor::engagement::gaze::GazeEstimator;
use engagement_monitor::engagement::pipeline::{FrameReport, SessionPipeline};
use engagement_monitor::engagement::session::SessionRecorder;
use engagement_monitor::engagement::synthetic::{ScenarioSegment, SyntheticScenario};
use engagement_monitor::engagement::types::{ClassifierMode, EngagementLevel};

const FPS: f64 = 10.0;

fn attentive_then_absent(seed: u64) -> SyntheticScenario {
    SyntheticScenario::new(
        seed,
        FPS,
        vec![ScenarioSegment::attentive(20.0), ScenarioSegment::absent(15.0)],
    )
}

fn run(scenario: &SyntheticScenario, classifier: EngagementClassifier) -> (Vec<FrameReport>, SessionRecorder) {
    let config = EngagementConfig::default();
    let session = scenario.render();
    let classifier = Arc::new(classifier);
    let mut recorder = SessionRecorder::new(classifier.mode(), classifier.is_degraded());
    let mut pipeline = SessionPipeline::new(
        &config,
        FaceLocator::new(Arc::new(session.detector), config.face.clone()),
        GazeEstimator::with_gradient_prior(&config.gaze),
        classifier,
    );

    let reports: Vec<FrameReport> = session
        .frames
        .iter()
        .map(|frame| {
            let report = pipeline.process_frame(frame);
            recorder.record(&report);
            report
        })
        .collect();
    (reports, recorder)
}

fn rules() -> EngagementClassifier {
    EngagementClassifier::rule_based(EngagementConfig::default().rules)
}

fn levels_between(reports: &[FrameReport], from_s: f64, to_s: f64) -> Vec<EngagementLevel> {
    reports
        .iter()
        .filter(|r| r.timestamp_ms >= from_s * 1000.0 && r.timestamp_ms < to_s * 1000.0)
        .map(|r| r.result.level)
        .collect()
}

fn stump_artifact_json(feature_names: Vec<String>) -> serde_json::Value {
    json!({
        "formatVersion": 1,
        "algorithm": "random_forest",
        "featureSchemaVersion": 1,
        "featureNames": feature_names,
        "scaler": { "mean": vec![0.0; 19], "scale": vec![1.0; 19] },
        "classes": [1, 2, 3, 4],
        "trees": [
            { "nodes": [
                { "feature": 16, "threshold": 0.5, "left": 1, "right": 2 },
                { "value": [0.0, 0.0, 1.0, 9.0] },
                { "value": [9.0, 1.0, 0.0, 0.0] }
            ] }
        ],
        "validationAccuracy": 0.87
    })
}

fn canonical_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

#[test]
fn same_seed_gives_the_same_session() {
    let scenario = attentive_then_absent(11);
    let (a, _) = run(&scenario, rules());
    let (b, _) = run(&scenario, rules());
    assert_eq!(a, b);
}

#[test]
fn attentive_viewer_then_empty_seat() {
    let (reports, recorder) = run(&attentive_then_absent(5), rules());

    let attentive = levels_between(&reports, 2.0, 20.0);
    let highly = attentive
        .iter()
        .filter(|l| **l == EngagementLevel::HighlyEngaged)
        .count();
    assert!(
        highly * 10 >= attentive.len() * 9,
        "only {highly}/{} attentive frames were level 1",
        attentive.len()
    );

    let away = levels_between(&reports, 30.0, 35.0);
    assert!(!away.is_empty());
    assert!(away.iter().all(|l| *l == EngagementLevel::Disengaged));

    let calibrated = reports.iter().find(|r| r.blink.is_active());
    assert!(calibrated.is_some(), "blink detector never calibrated");
    assert!(reports.iter().any(|r| r.blinked()));

    let summary = recorder.summary();
    assert_eq!(summary.frames_processed, reports.len() as u64);
    assert_eq!(summary.faces_detected, 200);
    assert!(summary.total_blinks >= 2);
    assert!(summary.engagement_score > 10.0 && summary.engagement_score < 100.0);
    assert!(!summary.degraded);
}

#[test]
fn absent_viewer_from_the_start_is_disengaged() {
    let scenario = SyntheticScenario::new(2, FPS, vec![ScenarioSegment::absent(5.0)]);
    let (reports, recorder) = run(&scenario, rules());
    assert!(reports.iter().all(|r| !r.face_detected));
    assert!(reports.iter().all(|r| r.result.level == EngagementLevel::Disengaged));
    assert_eq!(recorder.summary().engagement_score, 10.0);
}

#[test]
fn mismatched_artifact_degrades_but_keeps_classifying() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engagement_model.json");
    let mut names = canonical_names();
    names.swap(7, 8);
    std::fs::write(&path, stump_artifact_json(names).to_string()).unwrap();

    let classifier = EngagementClassifier::load(&path, EngagementConfig::default().rules);
    assert!(classifier.is_degraded());
    assert!(matches!(
        classifier.degradation(),
        Some(ModelArtifactError::SchemaMismatch(_))
    ));

    let scenario = SyntheticScenario::new(4, FPS, vec![ScenarioSegment::attentive(3.0)]);
    let (reports, recorder) = run(&scenario, classifier);
    assert!(reports.iter().all(|r| r.result.mode == ClassifierMode::RuleBased));
    let summary = recorder.summary();
    assert!(summary.degraded);
    assert_eq!(summary.classifier_mode, ClassifierMode::RuleBased);
}

#[test]
fn trained_artifact_drives_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engagement_model.json");
    let mut artifact = stump_artifact_json(canonical_names());
    artifact["featureFingerprint"] = json!(schema_fingerprint());
    std::fs::write(&path, artifact.to_string()).unwrap();

    let classifier = EngagementClassifier::load(&path, EngagementConfig::default().rules);
    assert_eq!(classifier.mode(), ClassifierMode::Trained);
    assert!(!classifier.is_degraded());

    let (reports, recorder) = run(&attentive_then_absent(9), classifier);
    assert!(reports.iter().all(|r| r.result.mode == ClassifierMode::Trained));
    assert_eq!(
        levels_between(&reports, 1.0, 20.0)
            .iter()
            .filter(|l| **l != EngagementLevel::HighlyEngaged)
            .count(),
        0
    );
    assert!(levels_between(&reports, 30.0, 35.0)
        .iter()
        .all(|l| *l == EngagementLevel::Disengaged));
    assert_eq!(recorder.summary().classifier_mode, ClassifierMode::Trained);
}

#[test]
fn detector_failures_are_gaps_not_errors() {
    let config = EngagementConfig::default();
    let scenario = SyntheticScenario::new(3, FPS, vec![ScenarioSegment::attentive(2.0)]);
    let session = scenario.render();
    let detector = session.detector.fail_on([3, 4, 5]);
    let mut pipeline = SessionPipeline::new(
        &config,
        FaceLocator::new(Arc::new(detector), config.face.clone()),
        GazeEstimator::with_gradient_prior(&config.gaze),
        Arc::new(rules()),
    );

    let reports: Vec<FrameReport> = session.frames.iter().map(|f| pipeline.process_frame(f)).collect();
    assert_eq!(reports.len(), 20);
    assert!(!reports[4].face_detected);
    assert!(reports[6].face_detected);
    assert!(reports[19].features.get("face_ratio").unwrap() < 1.0);
}

fn blink_count(status: &BlinkStatus) -> Option<u64> {
    match status {
        BlinkStatus::Active { blink_count, .. } => Some(*blink_count),
        BlinkStatus::Calibrating { .. } => None,
    }
}

#[test]
fn face_gaps_leave_calibration_and_blink_count_untouched() {
    let config = EngagementConfig::default();
    assert_eq!(config.blink.calibration_frames, 50);
    let scenario = SyntheticScenario::new(21, FPS, vec![ScenarioSegment::attentive(20.0)]);
    let session = scenario.render();
    let detector = session.detector.fail_on((10..30).chain(120..150));
    let mut pipeline = SessionPipeline::new(
        &config,
        FaceLocator::new(Arc::new(detector), config.face.clone()),
        GazeEstimator::with_gradient_prior(&config.gaze),
        Arc::new(rules()),
    );
    let reports: Vec<FrameReport> = session.frames.iter().map(|f| pipeline.process_frame(f)).collect();

    for report in &reports[10..30] {
        assert!(!report.face_detected);
        assert_eq!(
            report.blink,
            BlinkStatus::Calibrating {
                collected: 10,
                required: 50
            }
        );
    }

    // 10 samples before the gap plus 40 after it.
    let first_active = reports.iter().position(|r| r.blink.is_active());
    assert_eq!(first_active, Some(69));
    assert!(pipeline.blink_detector().is_calibrated());

    let before_gap = blink_count(&reports[119].blink);
    assert!(before_gap.is_some());
    for report in &reports[120..150] {
        assert!(!report.face_detected);
        assert_eq!(blink_count(&report.blink), before_gap);
    }
}
