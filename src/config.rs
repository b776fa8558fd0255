use crate::ollama::{Timeouts, DEFAULT_BASE_URL};
use crate::registry::RegistryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_DIR: &str = "ollama-chat";
const LOCAL_FILE: &str = "ollama-chat.toml";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Preferred model; empty means "first model the server lists".
    pub model: String,
    pub probe_timeout_ms: u64,
    pub list_timeout_ms: u64,
    pub generate_timeout_ms: u64,
    pub debounce_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: String::new(),
            probe_timeout_ms: 3_000,
            list_timeout_ms: 5_000,
            generate_timeout_ms: 60_000,
            debounce_ms: 500,
        }
    }
}

impl AppConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            probe: Duration::from_millis(self.probe_timeout_ms),
            list: Duration::from_millis(self.list_timeout_ms),
            generate: Duration::from_millis(self.generate_timeout_ms),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: self.base_url.clone(),
            selected_model: self.model.clone(),
            timeouts: self.timeouts(),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

/// Config files from lowest to highest priority.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(APP_DIR).join("config.toml"));
    }
    paths.push(PathBuf::from(LOCAL_FILE));
    paths
}

/// Merges every config file found, then `extra` (the `--config` flag) on top.
pub fn load(extra: Option<&Path>) -> Result<AppConfig> {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in config_search_paths() {
        if path.is_file() {
            merge_toml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(path) = extra {
        merge_toml(&mut merged, read_layer(path)?);
    }

    merged
        .try_into::<AppConfig>()
        .context("Invalid configuration values")
}

fn read_layer(path: &Path) -> Result<toml::Value> {
    debug!(path = %path.display(), "loading config layer");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Unable to parse {}", path.display()))
}

fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(toml::Value::Table(toml::map::Map::new()));
                merge_toml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
