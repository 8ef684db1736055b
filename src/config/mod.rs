// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for vasort

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::classify::RuleSet;
use crate::{Result, VasortError};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Classification task definition
    pub task: TaskConfig,

    /// Vision model provider
    pub provider: ProviderConfig,

    /// Photo library location
    pub library: LibraryConfig,

    /// Destination album
    pub album: AlbumConfig,

    /// Batch processing behavior
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Working directory and state file names
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskConfig {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub rules: RuleSet,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub settings: ProviderSettings,
}

/// Supported vision model providers
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "lmstudio")]
    LmStudio,
    #[serde(alias = "mlx")]
    MlxVlm,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lm_studio",
            ProviderKind::MlxVlm => "mlx_vlm",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "lm_studio" | "lmstudio" => Ok(ProviderKind::LmStudio),
            "mlx_vlm" | "mlx" => Ok(ProviderKind::MlxVlm),
            other => Err(format!(
                "unknown provider '{}' (valid: ollama, lm_studio, mlx_vlm)",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub api_url: String,

    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Per-request timeout. Each adapter supplies its own default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: f64,

    /// 0 disables the dimension check
    #[serde(default)]
    pub max_image_dimension_px: u32,

    /// Extra request parameters merged into the provider payload
    /// (temperature, top_p, max_tokens, ...)
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LibraryConfig {
    /// Root directory scanned recursively for photos
    pub root: PathBuf,

    /// Albums are directories created under this path
    pub albums_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlbumConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_album_update_frequency")]
    pub album_update_frequency: usize,
    #[serde(default = "default_skip_types")]
    pub skip_types: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_videos: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_debug_limit")]
    pub debug_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Holds temp exports, state, done ledger, log file and diagnostics/
    pub work_dir: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_done_file")]
    pub done_file: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default = "default_true")]
    pub file: bool,
}

// Default value functions
fn default_true() -> bool { true }
fn default_retries() -> u32 { 3 }
fn default_max_image_size_mb() -> f64 { 50.0 }
fn default_batch_size() -> usize { 100 }
fn default_album_update_frequency() -> usize { 5 }
fn default_debug_limit() -> usize { 1 }
fn default_skip_types() -> Vec<String> {
    vec!["HEIC".to_string(), "GIF".to_string()]
}
fn default_state_file() -> String { "state.json".to_string() }
fn default_done_file() -> String { "done.txt".to_string() }
fn default_log_file() -> String { "vasort.log".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            album_update_frequency: default_album_update_frequency(),
            skip_types: default_skip_types(),
            skip_videos: true,
            debug_mode: false,
            debug_limit: default_debug_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: true,
            file: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            task: TaskConfig {
                name: "Default Image Classification".to_string(),
                description: "Basic image classification task".to_string(),
                prompt: "Describe what you see in this image.".to_string(),
                rules: RuleSet::AlwaysNo,
            },
            provider: ProviderConfig {
                kind: ProviderKind::Ollama,
                settings: ProviderSettings {
                    model: "qwen2.5vl:3b".to_string(),
                    api_url: "http://127.0.0.1:11434/api/generate".to_string(),
                    max_retries: default_retries(),
                    timeout_secs: None,
                    max_image_size_mb: default_max_image_size_mb(),
                    max_image_dimension_px: 0,
                    options: serde_json::Map::new(),
                },
            },
            library: LibraryConfig {
                root: PathBuf::from("~/Pictures/Library"),
                albums_dir: PathBuf::from("~/Pictures/Albums"),
            },
            album: AlbumConfig {
                name: "Sorted_Photos".to_string(),
                create_if_missing: true,
            },
            processing: ProcessingConfig::default(),
            storage: StorageConfig {
                work_dir: PathBuf::from("~/Pictures/vasort"),
                state_file: default_state_file(),
                done_file: default_done_file(),
                log_file: default_log_file(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| {
            VasortError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.expand_paths();
        Ok(config)
    }

    /// Resolve configuration using the standard search order:
    /// explicit path, ./config.json, ~/.vasort/config.json, defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let (config, source) = Self::resolve_with_source(path)?;
        source.log();
        Ok(config)
    }

    /// Like [`resolve`](Self::resolve), but silent: returns where the
    /// configuration came from so the caller can log it once a subscriber
    /// is installed.
    pub fn resolve_with_source(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(VasortError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            return Ok((Self::load(path)?, ConfigSource::Explicit(path.to_path_buf())));
        }

        let mut candidates = vec![PathBuf::from("config.json")];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".vasort").join("config.json"));
        }

        for candidate in candidates {
            if candidate.exists() {
                let config = Self::load(&candidate)?;
                return Ok((config, ConfigSource::Found(candidate)));
            }
        }

        let mut config = Self::default();
        config.expand_paths();
        Ok((config, ConfigSource::Defaults))
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Full path to the checkpoint file
    pub fn state_path(&self) -> PathBuf {
        self.storage.work_dir.join(&self.storage.state_file)
    }

    /// Full path to the done ledger
    pub fn done_path(&self) -> PathBuf {
        self.storage.work_dir.join(&self.storage.done_file)
    }

    /// Directory for per-run diagnostic snapshots
    pub fn diagnostics_dir(&self) -> PathBuf {
        self.storage.work_dir.join("diagnostics")
    }

    /// Full path to the log file
    pub fn log_path(&self) -> PathBuf {
        self.storage.work_dir.join(&self.storage.log_file)
    }

    fn expand_paths(&mut self) {
        self.library.root = expand_tilde(&self.library.root);
        self.library.albums_dir = expand_tilde(&self.library.albums_dir);
        self.storage.work_dir = expand_tilde(&self.storage.work_dir);
    }
}

/// Where a resolved configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Found(PathBuf),
    Defaults,
}

impl ConfigSource {
    /// Emit the standard log line for this source
    pub fn log(&self) {
        match self {
            ConfigSource::Explicit(path) => {
                info!("Loading configuration from {}", path.display());
            }
            ConfigSource::Found(path) => {
                info!("Found configuration at {}", path.display());
            }
            ConfigSource::Defaults => warn!("No configuration file found, using defaults"),
        }
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that read or override HOME
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.processing.batch_size, 100);
        assert_eq!(config.processing.album_update_frequency, 5);
        assert_eq!(config.processing.skip_types, vec!["HEIC", "GIF"]);
        assert!(config.processing.skip_videos);
        assert!(!config.processing.debug_mode);
        assert_eq!(config.provider.settings.max_retries, 3);
        assert!(config.album.create_if_missing);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::default();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.task.name, config.task.name);
        assert_eq!(loaded.provider.kind, config.provider.kind);
        assert_eq!(loaded.album.name, config.album.name);
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, VasortError::Config(_)));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_resolve_missing_explicit_path() {
        let err = AppConfig::resolve(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, VasortError::Config(_)));
    }

    #[test]
    fn test_resolve_explicit_path_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        AppConfig::default().save(&path).unwrap();

        let (_, source) = AppConfig::resolve_with_source(Some(&path)).unwrap();
        assert_eq!(source, ConfigSource::Explicit(path));
    }

    #[test]
    fn test_resolve_home_config_and_defaults_fallback() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let saved_home = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());

        // Nothing anywhere in the search order: defaults
        let (config, source) = AppConfig::resolve_with_source(None).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.album.name, "Sorted_Photos");

        // ~/.vasort/config.json is picked up
        let home_config = dir.path().join(".vasort").join("config.json");
        std::fs::create_dir_all(home_config.parent().unwrap()).unwrap();
        let mut custom = AppConfig::default();
        custom.album.name = "From_Home".to_string();
        custom.save(&home_config).unwrap();

        let (config, source) = AppConfig::resolve_with_source(None).unwrap();
        assert_eq!(source, ConfigSource::Found(home_config));
        assert_eq!(config.album.name, "From_Home");

        match saved_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn test_provider_kind_aliases() {
        assert_eq!("lmstudio".parse::<ProviderKind>().unwrap(), ProviderKind::LmStudio);
        assert_eq!("mlx".parse::<ProviderKind>().unwrap(), ProviderKind::MlxVlm);
        assert_eq!("OLLAMA".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("gguf".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_serde() {
        let kind: ProviderKind = serde_json::from_str("\"lm_studio\"").unwrap();
        assert_eq!(kind, ProviderKind::LmStudio);
        let kind: ProviderKind = serde_json::from_str("\"mlx\"").unwrap();
        assert_eq!(kind, ProviderKind::MlxVlm);
        assert_eq!(serde_json::to_string(&ProviderKind::MlxVlm).unwrap(), "\"mlx_vlm\"");
    }

    #[test]
    fn test_unknown_provider_kind_is_config_error() {
        let json = r#"{"kind": "vertex", "settings": {"model": "m", "api_url": "u"}}"#;
        assert!(serde_json::from_str::<ProviderConfig>(json).is_err());
    }

    #[test]
    fn test_provider_options_flattened() {
        let json = r#"{
            "model": "qwen2.5vl:3b",
            "api_url": "http://127.0.0.1:11434/api/generate",
            "temperature": 0.2,
            "max_tokens": 64
        }"#;
        let settings: ProviderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.options.get("temperature").unwrap().as_f64().unwrap(), 0.2);
        assert_eq!(settings.options.get("max_tokens").unwrap().as_i64().unwrap(), 64);
        assert_eq!(settings.max_retries, 3);
        assert!(settings.timeout_secs.is_none());
    }

    #[test]
    fn test_storage_paths() {
        let mut config = AppConfig::default();
        config.storage.work_dir = PathBuf::from("/tmp/vasort");
        assert_eq!(config.state_path(), PathBuf::from("/tmp/vasort/state.json"));
        assert_eq!(config.done_path(), PathBuf::from("/tmp/vasort/done.txt"));
        assert_eq!(config.diagnostics_dir(), PathBuf::from("/tmp/vasort/diagnostics"));
    }

    #[test]
    fn test_expand_tilde() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/Pictures")), home.join("Pictures"));
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
