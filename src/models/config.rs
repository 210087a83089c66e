use crate::models::config_validator::validate_config;
use crate::models::error::{BackupError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default = "default_min_check_interval")]
    pub min_check_interval_secs: u64,
    #[serde(default = "default_unchanged_batch_size")]
    pub unchanged_batch_size: usize,
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
    #[serde(default = "default_progress_log_interval")]
    pub progress_log_interval_secs: u64,
}

fn default_database_file() -> String {
    "straw_backup.sqlite".to_string()
}
const fn default_min_check_interval() -> u64 {
    60 * 10
}
const fn default_unchanged_batch_size() -> usize {
    4096
}
const fn default_copy_buffer_size() -> usize {
    64 * 1024
}
const fn default_progress_log_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            min_check_interval_secs: default_min_check_interval(),
            unchanged_batch_size: default_unchanged_batch_size(),
            copy_buffer_size: default_copy_buffer_size(),
            progress_log_interval_secs: default_progress_log_interval(),
        }
    }
}

impl Config {
    /// Lower bound for the scheduler's sleep between passes.
    pub fn min_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_check_interval_secs)
    }

    pub fn progress_log_interval(&self) -> Duration {
        Duration::from_secs(self.progress_log_interval_secs)
    }
}

pub fn setup_config(config_file: String) -> Result<Config> {
    let config_path = PathBuf::from(config_file);
    info!("Loading config from: {}", config_path.display());

    let config_str = fs::read_to_string(&config_path).map_err(|cause| {
        BackupError::ConfigRead {
            path: config_path.clone(),
            cause,
        }
    })?;

    let config: Config = serde_json::from_str(&config_str).map_err(|cause| {
        BackupError::ConfigParse {
            path: config_path,
            cause,
        }
    })?;

    validate_config(&config)?;

    Ok(config)
}
