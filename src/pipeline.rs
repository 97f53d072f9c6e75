//! Processing pipeline: retain -> download -> separate -> normalize.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::fetcher::{FetchError, Fetcher};
use crate::library::{Library, LibraryError};
use crate::separator::{SeparateError, Separator};
use crate::workspace::Workspace;

/// Where a processing run failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[source] FetchError),

    #[error("metadata write failed: {0}")]
    Metadata(#[source] LibraryError),

    #[error("separation failed: {0}")]
    Separation(#[source] SeparateError),

    #[error("stem normalization failed: {0}")]
    Normalize(#[source] LibraryError),
}

/// Result of a completed processing run.
#[derive(Clone, Debug)]
pub struct ProcessOutcome {
    pub id: String,
    pub title: String,
    pub stems: Vec<String>,
}

/// Sequences the full media-to-stems pipeline.
///
/// Every run repeats all stages: re-processing a known identifier
/// re-downloads and re-separates in full, with no content short-circuit.
/// The no-overwrite rename in [`Library::normalize_stems`] keeps previously
/// normalized stems stable across re-runs.
pub struct Pipeline {
    workspace: Workspace,
    fetcher: Arc<dyn Fetcher>,
    separator: Arc<dyn Separator>,
    library: Library,
    /// Number of transient files kept when pruning before a download.
    keep_downloads: usize,
    /// Per-identifier locks. The deterministic transient path makes two
    /// concurrent runs for the same identifier corrupt each other's track
    /// file, so same-id runs are serialized here.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(
        workspace: Workspace,
        fetcher: Arc<dyn Fetcher>,
        separator: Arc<dyn Separator>,
        library: Library,
        keep_downloads: usize,
    ) -> Self {
        Self {
            workspace,
            fetcher,
            separator,
            library,
            keep_downloads,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the identifier's lock entry once no run holds or awaits it,
    /// keeping the table bounded by concurrent runs rather than by every
    /// identifier ever processed.
    async fn release_lock(&self, id: &str) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(id);
            }
        }
    }

    /// Run the full pipeline for one media item.
    ///
    /// A failed run may leave an orphaned transient track or a partially
    /// separated directory behind; the next retain or re-process run cleans
    /// or overwrites it.
    pub async fn process(
        &self,
        url: &str,
        id: &str,
        title: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        let lock = self.lock_for(id).await;
        let guard = lock.lock().await;

        let result = self.run_stages(url, id, title).await;

        drop(guard);
        drop(lock);
        self.release_lock(id).await;
        result
    }

    async fn run_stages(
        &self,
        url: &str,
        id: &str,
        title: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        info!("Processing {} ({})", id, title);

        // Prune before downloading so the new track does not count against
        // its own retention limit.
        self.workspace.retain(self.keep_downloads);

        let track = self
            .fetcher
            .download(url, id)
            .await
            .map_err(PipelineError::Download)?;

        // Metadata is written as soon as the download lands, ahead of the
        // much slower separation stage.
        self.library
            .write_meta(id, title, url)
            .map_err(PipelineError::Metadata)?;

        let song_dir = self
            .separator
            .separate(&track, id)
            .await
            .map_err(PipelineError::Separation)?;

        // The track served its purpose, reclaim the space.
        self.workspace.remove(&track);

        self.library
            .normalize_stems(&song_dir)
            .map_err(PipelineError::Normalize)?;

        let stems = match self.library.get(id) {
            Ok(entry) => entry.stems,
            Err(err) => {
                warn!("Could not list stems for {} after processing: {}", id, err);
                Vec::new()
            }
        };

        info!("Finished {}: {} stems", id, stems.len());
        Ok(ProcessOutcome {
            id: id.to_string(),
            title: title.to_string(),
            stems,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    use crate::fetcher::SearchResult;

    /// Fetcher stub writing a dummy track file, or failing on demand.
    struct StubFetcher {
        workspace: Workspace,
        fail: bool,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<SearchResult>, FetchError> {
            Ok(Vec::new())
        }

        async fn download(&self, _url: &str, id: &str) -> Result<PathBuf, FetchError> {
            if self.fail {
                return Err(FetchError::DownloadFailed("boom".to_string()));
            }
            let path = self.workspace.track_path(id, "mp3");
            fs::write(&path, b"fake mp3")?;
            Ok(path)
        }
    }

    /// Separator stub emitting raw demucs-style stem names.
    struct StubSeparator {
        library: Library,
        stems: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl Separator for StubSeparator {
        async fn separate(&self, track: &Path, id: &str) -> Result<PathBuf, SeparateError> {
            if self.fail {
                return Err(SeparateError::ProcessFailed("model exploded".to_string()));
            }
            assert!(track.is_file(), "separator should see the downloaded track");
            let dir = self.library.song_dir(id);
            fs::create_dir_all(&dir)?;
            for stem in &self.stems {
                fs::write(dir.join(stem), b"pcm")?;
            }
            Ok(dir)
        }
    }

    struct Fixture {
        _tmp: TempDir,
        workspace: Workspace,
        library: Library,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path().join("downloads"));
        workspace.init().unwrap();
        let library = Library::new(tmp.path().join("separated"), "htdemucs");
        Fixture {
            workspace,
            library,
            _tmp: tmp,
        }
    }

    fn pipeline_with(f: &Fixture, fetch_fail: bool, separate_fail: bool) -> Pipeline {
        Pipeline::new(
            f.workspace.clone(),
            Arc::new(StubFetcher {
                workspace: f.workspace.clone(),
                fail: fetch_fail,
            }),
            Arc::new(StubSeparator {
                library: f.library.clone(),
                stems: vec!["vocals.wav", "drums.wav"],
                fail: separate_fail,
            }),
            f.library.clone(),
            1,
        )
    }

    #[tokio::test]
    async fn process_end_to_end() {
        let f = fixture();
        let pipeline = pipeline_with(&f, false, false);

        let outcome = pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap();

        assert_eq!(outcome.id, "abc");
        assert_eq!(outcome.title, "My Song");
        assert_eq!(outcome.stems, vec!["Drums.wav", "Vocals.wav"]);

        let meta = f.library.read_meta(&f.library.song_dir("abc")).unwrap();
        assert_eq!(meta.title, "My Song");
        assert_eq!(meta.source_url, "https://x/watch?v=abc");

        // The transient track was consumed and deleted
        assert!(!f.workspace.track_path("abc", "mp3").exists());
    }

    #[tokio::test]
    async fn process_prunes_older_downloads_first() {
        let f = fixture();
        fs::write(f.workspace.track_path("old1", "mp3"), b"x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(15));
        fs::write(f.workspace.track_path("old2", "mp3"), b"x").unwrap();
        let pipeline = pipeline_with(&f, false, false);

        pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap();

        // retain(1) ran before the download: only the newest pre-existing
        // file survived, and the new track was deleted after separation.
        assert!(!f.workspace.track_path("old1", "mp3").exists());
        assert!(f.workspace.track_path("old2", "mp3").exists());
    }

    #[tokio::test]
    async fn download_failure_aborts_before_metadata() {
        let f = fixture();
        let pipeline = pipeline_with(&f, true, false);

        let err = pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Download(_)));
        assert!(!f.library.song_dir("abc").exists());
    }

    #[tokio::test]
    async fn separation_failure_leaves_metadata_and_track_orphaned() {
        let f = fixture();
        let pipeline = pipeline_with(&f, false, true);

        let err = pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Separation(_)));
        // No rollback: meta.json and the transient track stay behind for the
        // next retain or re-process run to clean up.
        assert!(f.library.song_dir("abc").join("meta.json").is_file());
        assert!(f.workspace.track_path("abc", "mp3").is_file());
    }

    #[tokio::test]
    async fn lock_table_is_emptied_after_runs() {
        let f = fixture();
        let pipeline = pipeline_with(&f, false, false);

        pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap();
        assert!(pipeline.locks.lock().await.is_empty());

        // Failed runs release their lock entry too
        let failing = pipeline_with(&f, true, false);
        failing
            .process("https://x/watch?v=def", "def", "Other Song")
            .await
            .unwrap_err();
        assert!(failing.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_same_id_runs_serialize_and_clean_up() {
        let f = fixture();
        let pipeline = pipeline_with(&f, false, false);

        let (first, second) = tokio::join!(
            pipeline.process("https://x/watch?v=abc", "abc", "My Song"),
            pipeline.process("https://x/watch?v=abc", "abc", "My Song"),
        );

        first.unwrap();
        second.unwrap();
        assert!(pipeline.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn reprocessing_keeps_previously_normalized_stems() {
        let f = fixture();
        let pipeline = pipeline_with(&f, false, false);

        pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap();
        fs::write(f.library.song_dir("abc").join("Vocals.wav"), b"edited").unwrap();

        let outcome = pipeline
            .process("https://x/watch?v=abc", "abc", "My Song")
            .await
            .unwrap();

        // The separator reproduced vocals.wav/drums.wav, but the canonical
        // targets already exist so the rename is a no-op.
        assert_eq!(
            fs::read(f.library.song_dir("abc").join("Vocals.wav")).unwrap(),
            b"edited"
        );
        // Raw re-separated files stay behind alongside the canonical ones
        assert!(outcome.stems.contains(&"vocals.wav".to_string()));
        assert!(outcome.stems.contains(&"Vocals.wav".to_string()));
    }
}
