//! Daemon configuration file support

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Optional TOML configuration. Command-line flags and environment
/// variables take precedence over values read from the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub backend: Option<String>,
    pub store_file: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub mode: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
