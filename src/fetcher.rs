//! Media search and audio download via the external yt-dlp tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::workspace::Workspace;

/// Audio container format every download is converted to.
pub const AUDIO_EXT: &str = "mp3";

/// Errors that can occur while searching or downloading media.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download reported success but {0:?} is missing")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single search hit. Ephemeral: produced by search, never persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub url: String,
    pub thumbnail: Option<String>,
}

/// External capability that resolves a query to candidate media items and
/// fetches a chosen item's audio track.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Search for media items. A query with no hits yields an empty list,
    /// not an error. Results keep the order the external tool returned.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, FetchError>;

    /// Download the audio track of `url` to the deterministic path keyed by
    /// `id` inside the transient download area.
    async fn download(&self, url: &str, id: &str) -> Result<PathBuf, FetchError>;
}

/// `Fetcher` implementation shelling out to yt-dlp.
pub struct YtDlpFetcher {
    program: String,
    workspace: Workspace,
    timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>, workspace: Workspace, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            workspace,
            timeout,
        }
    }

    async fn run(&self, cmd: &mut Command, what: &str) -> Result<std::process::Output, String> {
        let future = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, future).await {
            Err(_) => Err(format!(
                "{} timed out after {}s",
                what,
                self.timeout.as_secs()
            )),
            Ok(Err(err)) => Err(format!("failed to spawn {}: {}", self.program, err)),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--dump-json", "--flat-playlist", "--no-download"])
            .arg(format!("ytsearch{}:{}", max_results, query));

        debug!("Searching with {}: {:?}", self.program, query);
        let output = self
            .run(&mut cmd, "search")
            .await
            .map_err(FetchError::SearchFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::SearchFailed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_search_output(&stdout, max_results))
    }

    async fn download(&self, url: &str, id: &str) -> Result<PathBuf, FetchError> {
        let template = self
            .workspace
            .track_path(id, "%(ext)s")
            .to_string_lossy()
            .into_owned();

        let mut cmd = Command::new(&self.program);
        cmd.args(["-x", "--audio-format", AUDIO_EXT, "-o", &template])
            .arg(url);

        debug!("Downloading {} to {}", url, template);
        let output = self
            .run(&mut cmd, "download")
            .await
            .map_err(FetchError::DownloadFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::DownloadFailed(stderr.trim().to_string()));
        }

        // The tool's exit code alone is not trusted as the success signal;
        // the expected output file must exist as well.
        let track = self.workspace.track_path(id, AUDIO_EXT);
        if !track.is_file() {
            return Err(FetchError::MissingOutput(track));
        }
        Ok(track)
    }
}

/// One line of `--dump-json --flat-playlist` output.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<FlatThumbnail>,
}

#[derive(Debug, Deserialize)]
struct FlatThumbnail {
    url: String,
}

/// Parse newline-delimited JSON search entries, preserving order and capping
/// at `max_results`. Unparseable lines are skipped with a warning.
fn parse_search_output(stdout: &str, max_results: usize) -> Vec<SearchResult> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unparseable search entry: {}", err);
                None
            }
        })
        .take(max_results)
        .map(|entry| {
            let thumbnail = entry
                .thumbnail
                .or_else(|| entry.thumbnails.into_iter().next().map(|t| t.url));
            SearchResult {
                url: format!("https://www.youtube.com/watch?v={}", entry.id),
                title: entry.title.unwrap_or_else(|| entry.id.clone()),
                id: entry.id,
                thumbnail,
            }
        })
        .collect()
}
