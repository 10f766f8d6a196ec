use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub concurrency: Option<ConcurrencyConfig>,
    pub backends: Option<BackendsConfig>,
    pub monitor: Option<MonitorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_floor_secs: Option<u64>,
    pub backoff_ceiling_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Backend names to remove from the descriptor table entirely.
    pub disabled: Option<Vec<String>>,
    pub overrides: Option<Vec<BackendOverride>>,
}

/// Per-backend override of the built-in descriptor values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendOverride {
    pub name: String,
    pub usd_per_million_units: Option<f64>,
    pub call_timeout_secs: Option<u64>,
    pub max_input_chars: Option<usize>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Path of the append-only JSONL attempt log. Absent disables the sink.
    pub sink_path: Option<String>,
}

/// Platform config directory path: `<config_dir>/gleaner/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gleaner").join("config.toml"))
}

/// Load config by cascading CWD `.gleaner.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".gleaner.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        concurrency: Some(ConcurrencyConfig {
            max_concurrency: overlay
                .concurrency
                .as_ref()
                .and_then(|c| c.max_concurrency)
                .or_else(|| base.concurrency.as_ref().and_then(|c| c.max_concurrency)),
            max_attempts: overlay
                .concurrency
                .as_ref()
                .and_then(|c| c.max_attempts)
                .or_else(|| base.concurrency.as_ref().and_then(|c| c.max_attempts)),
            backoff_floor_secs: overlay
                .concurrency
                .as_ref()
                .and_then(|c| c.backoff_floor_secs)
                .or_else(|| {
                    base.concurrency
                        .as_ref()
                        .and_then(|c| c.backoff_floor_secs)
                }),
            backoff_ceiling_secs: overlay
                .concurrency
                .as_ref()
                .and_then(|c| c.backoff_ceiling_secs)
                .or_else(|| {
                    base.concurrency
                        .as_ref()
                        .and_then(|c| c.backoff_ceiling_secs)
                }),
        }),
        backends: Some(BackendsConfig {
            disabled: overlay
                .backends
                .as_ref()
                .and_then(|b| b.disabled.clone())
                .or_else(|| base.backends.as_ref().and_then(|b| b.disabled.clone())),
            overrides: overlay
                .backends
                .as_ref()
                .and_then(|b| b.overrides.clone())
                .or_else(|| base.backends.as_ref().and_then(|b| b.overrides.clone())),
        }),
        monitor: Some(MonitorConfig {
            sink_path: overlay
                .monitor
                .as_ref()
                .and_then(|m| m.sink_path.clone())
                .or_else(|| base.monitor.as_ref().and_then(|m| m.sink_path.clone())),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}
