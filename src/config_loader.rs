use crate::config::EngineConfig;
use color_eyre::eyre::{Context, Result};
use log::{info, warn};
use std::fs::File;
use std::path::Path;

/// Load and validate engine configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<EngineConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file {}", config_path.display()))?;

    let config: EngineConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;

    info!(
        "Correlation window ±{:?}, relay recency {:?}, result cap {}",
        config.correlation.time_window, config.relay.recency_window, config.query.max_results
    );

    Ok(config)
}

/// Load configuration if a path was given and exists, otherwise fall back to defaults
pub fn load_or_default(config_path: Option<&Path>) -> Result<EngineConfig> {
    match config_path {
        Some(path) if path.exists() => load_config(path),
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(EngineConfig::default())
        }
        None => Ok(EngineConfig::default()),
    }
}
