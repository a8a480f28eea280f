use std::sync::Arc;

use engagement_monitor::config::Config;
use engagement_monitor::engagement::classifier::EngagementClassifier;
use engagement_monitor::engagement::config::EngagementConfig;
use engagement_monitor::engagement::face::FaceLocator;
use engagement_monitor::engagement::gaze::{GazeEstimator, GazeModelWeights};
use engagement_monitor::engagement::pipeline::{FrameReport, SessionPipeline};
use engagement_monitor::engagement::synthetic::SyntheticScenario;
use engagement_monitor::logging::{init_tracing, LogConfig};
use engagement_monitor::runtime::{log_level_changes, run_session, ReplaySource};
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(&LogConfig {
        log_level: config.log_level.clone(),
        enable_file_logs: config.enable_file_logs,
        log_dir: config.log_dir.clone(),
    })?;
    tracing::info!("Starting engagement-monitor");

    let engagement_config = EngagementConfig::from_env(&config.engagement)?;

    let gaze = match &config.gaze_weights_path {
        Some(path) => GazeEstimator::new(Arc::new(GazeModelWeights::load(path, &engagement_config.gaze)?))?,
        None => GazeEstimator::with_gradient_prior(&engagement_config.gaze),
    };

    let classifier = Arc::new(match &config.model_path {
        Some(path) => EngagementClassifier::load(path, engagement_config.rules.clone()),
        None => EngagementClassifier::rule_based(engagement_config.rules.clone()),
    });
    if let Some(reason) = classifier.degradation() {
        tracing::warn!(reason = %reason, "Running in degraded rule-based mode");
    }

    let scenario = SyntheticScenario::classroom(
        config.synthetic.seed,
        config.synthetic.fps,
        config.synthetic.seconds,
    );
    tracing::info!(
        seed = scenario.seed,
        frames = scenario.total_frames(),
        realtime = config.synthetic.realtime,
        "Rendering synthetic session"
    );
    let session = scenario.render();

    let locator = FaceLocator::new(Arc::new(session.detector), engagement_config.face.clone());
    let pipeline = SessionPipeline::new(&engagement_config, locator, gaze, classifier);

    let mut source = ReplaySource::new(session.frames);
    if config.synthetic.realtime {
        source = source.paced(config.synthetic.fps);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(8);
    tokio::spawn(shutdown_signal(shutdown_tx.clone()));

    let (report_tx, report_rx) = mpsc::channel::<FrameReport>(engagement_config.runtime.report_buffer);
    let printer = tokio::spawn(log_level_changes(report_rx));

    let summary = run_session(source, pipeline, Some(report_tx), shutdown_rx).await?;
    match printer.await {
        Ok(changes) => tracing::debug!(changes, "Report listener finished"),
        Err(e) => tracing::error!(error = %e, "Report listener task panicked"),
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
