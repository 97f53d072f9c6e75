use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stembox::config::{AppConfig, CliConfig, FileConfig};
use stembox::fetcher::{Fetcher, YtDlpFetcher};
use stembox::library::Library;
use stembox::pipeline::Pipeline;
use stembox::separator::DemucsSeparator;
use stembox::server::{run_server, RequestsLoggingLevel, ServerConfig};
use stembox::workspace::Workspace;

/// Canonicalize a CLI path argument. Paths that do not exist yet (they get
/// created at startup) are kept as given, anchored to the current directory.
fn parse_path(s: &str) -> Result<PathBuf> {
    let resolved = match PathBuf::from(s).canonicalize() {
        Ok(path) => path,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => PathBuf::from(s),
        Err(err) => return Err(err).with_context(|| format!("Error resolving path: {}", s)),
    };
    if resolved.is_absolute() {
        Ok(resolved)
    } else {
        Ok(std::env::current_dir()?.join(resolved))
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory where transient audio downloads land before separation.
    #[clap(long, default_value = "downloads", value_parser = parse_path)]
    pub downloads_dir: PathBuf,

    /// Root directory of the persistent stem library.
    #[clap(long, default_value = "separated", value_parser = parse_path)]
    pub separated_dir: PathBuf,

    /// Demucs model name; stems are stored under `<separated_dir>/<model>/`.
    #[clap(long, default_value = "htdemucs")]
    pub model: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Program used for searching and downloading media.
    #[clap(long, default_value = "yt-dlp")]
    pub yt_dlp_program: String,

    /// Python interpreter used to invoke demucs.
    #[clap(long, default_value = "python3")]
    pub python_program: String,

    /// Device passed to demucs.
    #[clap(long, default_value = "cpu")]
    pub device: String,

    /// Maximum number of search results returned per query.
    #[clap(long, default_value_t = 6)]
    pub search_results: usize,

    /// Number of transient downloads kept when pruning before a new one.
    #[clap(long, default_value_t = 1)]
    pub keep_downloads: usize,

    /// Timeout in seconds for the download subprocess.
    #[clap(long, default_value_t = 600)]
    pub fetch_timeout_sec: u64,

    /// Timeout in seconds for the separation subprocess.
    #[clap(long, default_value_t = 1800)]
    pub separate_timeout_sec: u64,

    /// Path to a TOML config file; its values override CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            downloads_dir: self.downloads_dir.clone(),
            separated_dir: self.separated_dir.clone(),
            model: self.model.clone(),
            port: self.port,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            yt_dlp_program: self.yt_dlp_program.clone(),
            python_program: self.python_program.clone(),
            device: self.device.clone(),
            search_results: self.search_results,
            keep_downloads: self.keep_downloads,
            fetch_timeout_sec: self.fetch_timeout_sec,
            separate_timeout_sec: self.separate_timeout_sec,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .expect("Failed to initialize tracing");

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config);

    info!("Download area: {:?}", config.downloads_dir);
    info!(
        "Stem library: {:?} (model {})",
        config.separated_dir, config.model
    );

    let workspace = Workspace::new(&config.downloads_dir);
    workspace.init().context("Could not create download dir")?;
    std::fs::create_dir_all(&config.separated_dir).context("Could not create library dir")?;

    let library = Library::new(&config.separated_dir, &config.model);

    let fetcher: Arc<dyn Fetcher> = Arc::new(YtDlpFetcher::new(
        &config.yt_dlp_program,
        workspace.clone(),
        config.fetch_timeout,
    ));
    let separator = Arc::new(DemucsSeparator::new(
        &config.python_program,
        &config.device,
        &config.model,
        &config.separated_dir,
        config.separate_timeout,
    ));

    let pipeline = Arc::new(Pipeline::new(
        workspace,
        fetcher.clone(),
        separator,
        library.clone(),
        config.keep_downloads,
    ));

    let server_config = ServerConfig {
        port: config.port,
        requests_logging_level: config.logging_level,
        frontend_dir_path: config.frontend_dir_path,
        search_results: config.search_results,
    };

    info!("Ready to serve at port {}!", server_config.port);
    run_server(server_config, pipeline, fetcher, library).await
}
