//! Daemon configuration
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/beatbridge/config.yaml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// JACK client name (JACK may rename if taken)
    pub client_name: String,
    /// Session settings (tempo, quantum, reconciliation cadence)
    pub session: SessionConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            client_name: "beatbridge".to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Session configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial tempo in beats per minute
    pub tempo: f64,
    /// Beats per bar used as the phase-alignment grid
    pub quantum: f64,
    /// Reconciliation poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            quantum: 4.0,
            poll_interval_ms: 100,
        }
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/beatbridge/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("beatbridge")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config(path: &Path) -> DaemonConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return DaemonConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<DaemonConfig>(&contents) {
            Ok(mut config) => {
                // Out-of-range values would poison the session's beat math
                if config.session.tempo <= 0.0 {
                    log::warn!(
                        "load_config: invalid tempo {}, using default",
                        config.session.tempo
                    );
                    config.session.tempo = SessionConfig::default().tempo;
                }
                if config.session.quantum < 1.0 {
                    log::warn!(
                        "load_config: invalid quantum {}, using default",
                        config.session.quantum
                    );
                    config.session.quantum = SessionConfig::default().quantum;
                }
                log::info!(
                    "load_config: Loaded config - client: {}, tempo: {:.1}, quantum: {:.1}",
                    config.client_name,
                    config.session.tempo,
                    config.session.quantum
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                DaemonConfig::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_config: Failed to read config file: {}, using defaults",
                e
            );
            DaemonConfig::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &DaemonConfig, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}
