//! Common test infrastructure
//!
//! Spawns the real axum app on an ephemeral port, with the external
//! yt-dlp/demucs capabilities replaced by filesystem stubs.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use stembox::fetcher::{FetchError, Fetcher, SearchResult};
use stembox::library::Library;
use stembox::pipeline::Pipeline;
use stembox::separator::{SeparateError, Separator};
use stembox::server::{make_app, ServerConfig};
use stembox::workspace::Workspace;

pub const MODEL: &str = "htdemucs";

/// Fetcher stub: canned search results, downloads are dummy mp3 files.
struct StubFetcher {
    workspace: Workspace,
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let results = vec![
            SearchResult {
                id: "abc".to_string(),
                title: format!("{} (Official Video)", query),
                url: "https://www.youtube.com/watch?v=abc".to_string(),
                thumbnail: Some("https://i.ytimg.com/abc.jpg".to_string()),
            },
            SearchResult {
                id: "def".to_string(),
                title: format!("{} (Live)", query),
                url: "https://www.youtube.com/watch?v=def".to_string(),
                thumbnail: None,
            },
        ];
        Ok(results.into_iter().take(max_results).collect())
    }

    async fn download(&self, _url: &str, id: &str) -> Result<PathBuf, FetchError> {
        let path = self.workspace.track_path(id, "mp3");
        fs::write(&path, b"fake mp3")?;
        Ok(path)
    }
}

/// Separator stub: emits raw demucs-style stem files.
struct StubSeparator {
    library: Library,
}

#[async_trait]
impl Separator for StubSeparator {
    async fn separate(&self, _track: &Path, id: &str) -> Result<PathBuf, SeparateError> {
        let dir = self.library.song_dir(id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("vocals.wav"), b"vocal pcm")?;
        fs::write(dir.join("drums.wav"), b"drum pcm")?;
        Ok(dir)
    }
}

pub struct TestServer {
    pub base_url: String,
    workspace: Workspace,
    library: Library,
    // Keeps the on-disk fixture alive for the server's lifetime
    _tmp: TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path().join("downloads"));
        workspace.init().unwrap();
        let library = Library::new(tmp.path().join("separated"), MODEL);

        let fetcher = Arc::new(StubFetcher {
            workspace: workspace.clone(),
        });
        let pipeline = Arc::new(Pipeline::new(
            workspace.clone(),
            fetcher.clone(),
            Arc::new(StubSeparator {
                library: library.clone(),
            }),
            library.clone(),
            1,
        ));

        let config = ServerConfig {
            search_results: 6,
            ..Default::default()
        };
        let app = make_app(config, pipeline, fetcher, library.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            workspace,
            library,
            _tmp: tmp,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn track_path(&self, id: &str) -> PathBuf {
        self.workspace.track_path(id, "mp3")
    }

    pub fn song_dir(&self, id: &str) -> PathBuf {
        self.library.song_dir(id)
    }
}
