//! Optional TOML configuration file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Values loadable from a TOML file. Every field is optional; present values
/// override the corresponding CLI arguments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub downloads_dir: Option<String>,
    pub separated_dir: Option<String>,
    pub model: Option<String>,
    pub port: Option<u16>,
    pub frontend_dir_path: Option<String>,
    pub yt_dlp_program: Option<String>,
    pub python_program: Option<String>,
    pub device: Option<String>,
    pub search_results: Option<usize>,
    pub keep_downloads: Option<usize>,
    pub fetch_timeout_sec: Option<u64>,
    pub separate_timeout_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("Could not parse config file {:?}", path))
    }
}
