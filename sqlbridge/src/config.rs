///
/// Bridge configuration.
///
/// Loaded from TOML; every field has a default so an empty document is a
/// valid configuration:
///
/// ```toml
/// io_threads = 4
/// engine_thread_name = "sqlbridge-engine"
/// forward_engine_log = true
/// register_memory_vfs = true
///
/// [default_open]
/// pathname = ":memory:"
/// flags = ["uri", "create", "readwrite", "exrescode"]
/// vfs = ""
/// ```
///

use std::path::Path;

use serde::Deserialize;

use crate::conn::OpenParams;
use crate::error::{Error, Result};

/// Name the in-memory backend is registered under at startup.
pub const MEMORY_VFS_NAME: &str = "mem";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Worker threads of the runtime that drives storage backend futures.
    pub io_threads: usize,
    pub engine_thread_name: String,
    /// Route the engine's diagnostic log through `tracing`.
    pub forward_engine_log: bool,
    /// Register `MemoryVfs` as `"mem"` when the engine starts.
    pub register_memory_vfs: bool,
    /// Used when a closed connection is reopened implicitly.
    pub default_open: OpenParams,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            engine_thread_name: "sqlbridge-engine".to_string(),
            forward_engine_log: true,
            register_memory_vfs: true,
            default_open: OpenParams::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_threads == 0 {
            return Err(Error::Config("io_threads must be at least 1".to_string()));
        }
        if self.engine_thread_name.is_empty() {
            return Err(Error::Config("engine_thread_name must not be empty".to_string()));
        }
        Ok(())
    }
}
