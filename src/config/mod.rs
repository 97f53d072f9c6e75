mod file_config;

pub use file_config::FileConfig;

use crate::server::RequestsLoggingLevel;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that take part in config resolution. Mirrors the clap
/// struct in `main.rs`.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub downloads_dir: PathBuf,
    pub separated_dir: PathBuf,
    pub model: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub yt_dlp_program: String,
    pub python_program: String,
    pub device: String,
    pub search_results: usize,
    pub keep_downloads: usize,
    pub fetch_timeout_sec: u64,
    pub separate_timeout_sec: u64,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub downloads_dir: PathBuf,
    pub separated_dir: PathBuf,
    pub model: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub yt_dlp_program: String,
    pub python_program: String,
    pub device: String,
    pub search_results: usize,
    pub keep_downloads: usize,
    pub fetch_timeout: Duration,
    pub separate_timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and an optional TOML file.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Self {
        let file = file_config.unwrap_or_default();

        AppConfig {
            downloads_dir: file
                .downloads_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.downloads_dir.clone()),
            separated_dir: file
                .separated_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.separated_dir.clone()),
            model: file.model.unwrap_or_else(|| cli.model.clone()),
            port: file.port.unwrap_or(cli.port),
            logging_level: cli.logging_level.clone(),
            frontend_dir_path: file.frontend_dir_path.or_else(|| cli.frontend_dir_path.clone()),
            yt_dlp_program: file
                .yt_dlp_program
                .unwrap_or_else(|| cli.yt_dlp_program.clone()),
            python_program: file
                .python_program
                .unwrap_or_else(|| cli.python_program.clone()),
            device: file.device.unwrap_or_else(|| cli.device.clone()),
            search_results: file.search_results.unwrap_or(cli.search_results),
            keep_downloads: file.keep_downloads.unwrap_or(cli.keep_downloads),
            fetch_timeout: Duration::from_secs(
                file.fetch_timeout_sec.unwrap_or(cli.fetch_timeout_sec),
            ),
            separate_timeout: Duration::from_secs(
                file.separate_timeout_sec.unwrap_or(cli.separate_timeout_sec),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_defaults() -> CliConfig {
        CliConfig {
            downloads_dir: PathBuf::from("downloads"),
            separated_dir: PathBuf::from("separated"),
            model: "htdemucs".to_string(),
            port: 5000,
            logging_level: RequestsLoggingLevel::Path,
            frontend_dir_path: None,
            yt_dlp_program: "yt-dlp".to_string(),
            python_program: "python3".to_string(),
            device: "cpu".to_string(),
            search_results: 6,
            keep_downloads: 1,
            fetch_timeout_sec: 600,
            separate_timeout_sec: 1800,
        }
    }

    #[test]
    fn cli_values_apply_without_file_config() {
        let config = AppConfig::resolve(&cli_defaults(), None);

        assert_eq!(config.model, "htdemucs");
        assert_eq!(config.port, 5000);
        assert_eq!(config.keep_downloads, 1);
        assert_eq!(config.fetch_timeout, Duration::from_secs(600));
    }

    #[test]
    fn file_config_overrides_cli() {
        let file = FileConfig {
            model: Some("htdemucs_6s".to_string()),
            port: Some(8080),
            separate_timeout_sec: Some(60),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_defaults(), Some(file));

        assert_eq!(config.model, "htdemucs_6s");
        assert_eq!(config.port, 8080);
        assert_eq!(config.separate_timeout, Duration::from_secs(60));
        // Untouched fields keep their CLI values
        assert_eq!(config.downloads_dir, PathBuf::from("downloads"));
    }
}
