use std::env;
use std::str::FromStr;

use crate::constants::{DEFAULT_SYNTHETIC_FPS, DEFAULT_SYNTHETIC_SECONDS};

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    /// Trained classifier artifact. Unset means rule-based by choice.
    pub model_path: Option<String>,
    /// Gaze model weights. Unset means the built-in gradient model.
    pub gaze_weights_path: Option<String>,
    pub synthetic: SyntheticConfig,
    pub engagement: EngagementEnvConfig,
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub fps: f64,
    pub seconds: f64,
    /// Pace frames at `fps` instead of replaying as fast as possible.
    pub realtime: bool,
}

/// Environment overrides applied on top of the engagement config file.
#[derive(Debug, Clone, Default)]
pub struct EngagementEnvConfig {
    pub config_path: Option<String>,
    pub window_seconds: Option<f64>,
    pub calibration_frames: Option<usize>,
    pub blink_sensitivity: Option<f64>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            model_path: env_opt("ENGAGEMENT_MODEL_PATH"),
            gaze_weights_path: env_opt("GAZE_WEIGHTS_PATH"),
            synthetic: SyntheticConfig {
                seed: env_or_parse("SYNTHETIC_SEED", 42_u64),
                fps: env_or_parse("SYNTHETIC_FPS", DEFAULT_SYNTHETIC_FPS),
                seconds: env_or_parse("SYNTHETIC_SECONDS", DEFAULT_SYNTHETIC_SECONDS),
                realtime: env_or_bool("SYNTHETIC_REALTIME", true),
            },
            engagement: EngagementEnvConfig {
                config_path: env_opt("ENGAGEMENT_CONFIG_PATH"),
                window_seconds: env_opt_parse("ENGAGEMENT_WINDOW_SECONDS"),
                calibration_frames: env_opt_parse("BLINK_CALIBRATION_FRAMES"),
                blink_sensitivity: env_opt_parse("BLINK_SENSITIVITY"),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// `None` when unset or blank.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_opt_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Failed to parse env var, ignoring override");
            None
        }
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn managed_keys() -> &'static [&'static str] {
        &[
            "RUST_LOG",
            "ENGAGEMENT_MODEL_PATH",
            "SYNTHETIC_SEED",
            "SYNTHETIC_FPS",
            "SYNTHETIC_REALTIME",
            "ENGAGEMENT_WINDOW_SECONDS",
            "BLINK_CALIBRATION_FRAMES",
        ]
    }

    fn clear_keys(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_when_missing() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.model_path, None);
        assert_eq!(cfg.synthetic.seed, 42);
        assert!(cfg.synthetic.realtime);
        assert_eq!(cfg.engagement.window_seconds, None);
    }

    #[test]
    fn parses_numeric_values() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("SYNTHETIC_SEED", "7");
        env::set_var("ENGAGEMENT_WINDOW_SECONDS", "5.5");
        env::set_var("BLINK_CALIBRATION_FRAMES", "30");

        let cfg = Config::from_env();
        assert_eq!(cfg.synthetic.seed, 7);
        assert_eq!(cfg.engagement.window_seconds, Some(5.5));
        assert_eq!(cfg.engagement.calibration_frames, Some(30));
        clear_keys(managed_keys());
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("SYNTHETIC_FPS", "fast");
        env::set_var("BLINK_CALIBRATION_FRAMES", "-3");
        env::set_var("SYNTHETIC_REALTIME", "maybe");

        let cfg = Config::from_env();
        assert_eq!(cfg.synthetic.fps, DEFAULT_SYNTHETIC_FPS);
        assert_eq!(cfg.engagement.calibration_frames, None);
        assert!(cfg.synthetic.realtime);
        clear_keys(managed_keys());
    }

    #[test]
    fn blank_paths_are_unset() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("ENGAGEMENT_MODEL_PATH", "   ");
        assert_eq!(Config::from_env().model_path, None);

        env::set_var("ENGAGEMENT_MODEL_PATH", "./models/engagement.json");
        assert_eq!(
            Config::from_env().model_path.as_deref(),
            Some("./models/engagement.json")
        );
        clear_keys(managed_keys());
    }
}
