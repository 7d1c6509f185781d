use std::path::PathBuf;
use std::str::FromStr;

use mirt_algo::evaluation::{DEFAULT_BATCH_USERS, DEFAULT_HELD_OUT_POSITION};
use mirt_algo::LogLayout;

use crate::error::ConfigError;
use crate::logging::LoggingConfig;

/// Where the fitted model comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// JSON `{ "params": { ... } }` in the live params format
    ModelFile(PathBuf),
    /// Offline parameter snapshot
    Snapshot(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelSource,
    pub responses_file: PathBuf,
    /// `None` writes predictions to stdout
    pub output_file: Option<PathBuf>,
    pub layout: LogLayout,
    pub held_out_position: usize,
    pub seed: u64,
    pub batch_users: usize,
    pub live_steps: Option<usize>,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let model = match (var("MIRT_MODEL_FILE"), var("MIRT_SNAPSHOT_FILE")) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingModel),
            (Some(path), None) => ModelSource::ModelFile(PathBuf::from(path)),
            (None, Some(path)) => ModelSource::Snapshot(PathBuf::from(path)),
            (None, None) => {
                return Err(ConfigError::Missing("MIRT_MODEL_FILE or MIRT_SNAPSHOT_FILE"))
            }
        };

        let responses_file = var("MIRT_RESPONSES_FILE")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("MIRT_RESPONSES_FILE"))?;

        let defaults = LogLayout::default();
        let layout = LogLayout {
            user_idx: parse_or(&var, "MIRT_USER_IDX", defaults.user_idx)?,
            exercise_idx: parse_or(&var, "MIRT_EXERCISE_IDX", defaults.exercise_idx)?,
            time_idx: parse_or(&var, "MIRT_TIME_IDX", defaults.time_idx)?,
            correct_idx: parse_or(&var, "MIRT_CORRECT_IDX", defaults.correct_idx)?,
        };

        let held_out_position =
            parse_or(&var, "MIRT_HELD_OUT_POSITION", DEFAULT_HELD_OUT_POSITION)?;
        if held_out_position == 0 {
            return Err(ConfigError::Invalid {
                key: "MIRT_HELD_OUT_POSITION",
                value: "0".to_string(),
            });
        }

        let seed = match var("MIRT_SEED") {
            Some(_) => parse_or(&var, "MIRT_SEED", 0u64)?,
            None => clock_seed(),
        };

        let live_steps = match var("MIRT_LIVE_STEPS") {
            Some(_) => Some(parse_or(&var, "MIRT_LIVE_STEPS", 0usize)?),
            None => None,
        };

        let logging = LoggingConfig {
            level: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            file_logs: var("ENABLE_FILE_LOGS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_dir: var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        };

        Ok(Self {
            model,
            responses_file,
            output_file: var("MIRT_OUTPUT_FILE").map(PathBuf::from),
            layout,
            held_out_position,
            seed,
            batch_users: parse_or(&var, "MIRT_BATCH_USERS", DEFAULT_BATCH_USERS)?.max(1),
            live_steps,
            logging,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn clock_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}
