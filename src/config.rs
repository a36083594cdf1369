use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Quality;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "cyberdl.toml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Managed cookie directory
    pub cookies: CookieConfig,
    /// Download defaults
    pub download: DownloadConfig,
    /// How to run the download engine
    pub engine: EngineConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Directory holding uploaded `.txt` cookie files
    pub dir: PathBuf,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cookies"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Save directory used when none is given on the command line
    pub dir: Option<PathBuf>,
    /// Quality used when none is given on the command line
    pub quality: Quality,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable; bundled binary or `yt-dlp` on PATH when unset
    pub program: Option<PathBuf>,
    /// Arguments placed before yt-dlp's own (e.g. `["-m", "yt_dlp"]`)
    pub program_args: Vec<String>,
    /// Arguments appended to every invocation
    pub extra_args: Vec<String>,
    /// Browser for automatic cookie extraction; detected when unset
    pub browser: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    /// Also write daily-rolling log files here
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
