//! Engine configuration files.
//!
//! A config file is TOML mirroring [`EngineConfig`]. Every section and field
//! is optional; whatever is missing takes the engine default. Loading always
//! validates, so a config that loads is one [`kindle_core::Engine::new`]
//! accepts.

use std::fs;
use std::path::Path;

use kindle_core::EngineConfig;

use crate::error::{Result, StoreError};

pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)
        .map_err(|e| StoreError::InvalidData(format!("invalid config TOML: {e}")))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), "loaded engine config");
    Ok(config)
}

/// Defaults when `path` does not exist.
pub fn load_or_default(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(EngineConfig::default())
    }
}

pub fn to_toml_string(config: &EngineConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|e| StoreError::InvalidData(format!("config encode failed: {e}")))
}

pub fn write_config(path: &Path, config: &EngineConfig) -> Result<()> {
    let content = to_toml_string(config)?;
    fs::write(path, content).map_err(|e| {
        StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
    })
}
