//! Per-instance storage layout.
//!
//! ```text
//! $KINDLE_DATA_DIR (default ~/.kindle)/
//! └── instances/
//!     └── <name>/
//!         ├── graph.db
//!         └── config.toml
//! ```
//!
//! Each instance is an independent graph with its own engine configuration.

use std::path::{Path, PathBuf};
use std::{env, fs};

use uuid::Uuid;

use kindle_core::EngineConfig;

use crate::config;
use crate::error::{Result, StoreError};
use crate::store::Store;

pub const DEFAULT_INSTANCE: &str = "default";

/// Default base directory for all kindle storage.
pub fn default_base_dir() -> PathBuf {
    if let Ok(dir) = env::var("KINDLE_DATA_DIR")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs_home().join(".kindle")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Sanitize an instance name for use as a directory name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Directory of the named instance under `base`. Names are sanitized and an
/// empty name means [`DEFAULT_INSTANCE`].
pub fn instance_dir(base: &Path, name: &str) -> PathBuf {
    base.join("instances").join(instance_name(name))
}

fn instance_name(name: &str) -> String {
    let sanitized = sanitize_name(name);
    if sanitized.is_empty() {
        DEFAULT_INSTANCE.to_string()
    } else {
        sanitized
    }
}

/// Names of every instance under `base`, sorted.
pub fn list_instances(base: &Path) -> Result<Vec<String>> {
    let dir = base.join("instances");
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&dir)
        .map_err(|e| StoreError::InvalidData(format!("failed to read {}: {e}", dir.display())))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("graph.db").exists())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// An opened instance: its store, its configuration and where they live.
pub struct Instance {
    name: String,
    dir: PathBuf,
    id: Uuid,
    store: Store,
    config: EngineConfig,
}

impl Instance {
    /// Open (creating if needed) the named instance.
    /// `base_dir` overrides the base directory (for testing).
    pub fn open(name: &str, base_dir: Option<&Path>) -> Result<Self> {
        let name = instance_name(name);
        let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
        let dir = instance_dir(&base, &name);
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::InvalidData(format!("failed to create {}: {e}", dir.display()))
        })?;

        let config = config::load_or_default(&dir.join("config.toml"))?;
        let store = Store::open(&dir.join("graph.db"))?;
        let id = store.instance_id()?;
        tracing::debug!(instance = %name, %id, dir = %dir.display(), "opened instance");

        Ok(Self {
            name,
            dir,
            id,
            store,
            config,
        })
    }

    /// In-memory store with default config (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let store = Store::open_in_memory()?;
        let id = store.instance_id()?;
        Ok(Self {
            name: "test".to_string(),
            dir: PathBuf::new(),
            id,
            store,
            config: EngineConfig::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_parts(self) -> (Store, EngineConfig) {
        (self.store, self.config)
    }
}
