//! Configuration for voxlog paths and the server.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOXLOG_HOME, VOXLOG_DB, VOXLOG_ADDR)
//! 2. Config file (.voxlog/config.yaml)
//! 3. Defaults (~/.voxlog, 127.0.0.1:8080)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voxlog/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub voice: Option<VoiceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to config file)
    pub home: Option<String>,
    /// Database file (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Whisper model name passed to the transcriber
    pub model: Option<String>,
    /// Input device name; system default when absent
    pub device: Option<String>,
    /// Capture window for the synchronous endpoint, in seconds
    pub window_secs: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to voxlog home (state directory)
    pub home: PathBuf,
    /// Absolute path to the entries database
    pub db_path: PathBuf,
    /// Listen address for the HTTP server
    pub listen: String,
    /// Voice capture settings
    pub voice: VoiceSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub model: String,
    pub device: Option<String>,
    pub window_secs: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            device: None,
            window_secs: 5,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    find_config_file_from(&std::env::current_dir().ok()?)
}

fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".voxlog").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".voxlog");

    let config_file = find_config_file();

    let (home, db_rel, listen, voice) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let home = if let Ok(env_home) = std::env::var("VOXLOG_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to the .voxlog/ directory
            let voxlog_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(voxlog_dir, home_path)
        } else {
            default_home.clone()
        };

        let db_rel = config.paths.database.clone();

        let listen = config
            .server
            .as_ref()
            .and_then(|s| s.listen.clone())
            .unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let voice = VoiceSettings {
            model: config
                .voice
                .as_ref()
                .and_then(|v| v.model.clone())
                .unwrap_or_else(|| "base".to_string()),
            device: config.voice.as_ref().and_then(|v| v.device.clone()),
            window_secs: config
                .voice
                .as_ref()
                .and_then(|v| v.window_secs)
                .unwrap_or(5),
        };

        (home, db_rel, listen, voice)
    } else {
        let home = std::env::var("VOXLOG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (
            home,
            None,
            "127.0.0.1:8080".to_string(),
            VoiceSettings::default(),
        )
    };

    let db_path = if let Ok(env_db) = std::env::var("VOXLOG_DB") {
        PathBuf::from(env_db)
    } else {
        let rel = db_rel.unwrap_or_else(|| "journal.db".to_string());
        resolve_path(&home, &rel)
    };

    let listen = std::env::var("VOXLOG_ADDR").unwrap_or(listen);

    Ok(ResolvedConfig {
        home,
        db_path,
        listen,
        voice,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the entries database path.
pub fn db_path() -> Result<PathBuf> {
    Ok(config()?.db_path.clone())
}
