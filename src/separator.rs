//! Stem separation via the external demucs tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors that can occur while separating a track into stems.
#[derive(Debug, Error)]
pub enum SeparateError {
    #[error("separation process failed: {0}")]
    ProcessFailed(String),

    #[error("separation timed out after {0}s")]
    TimedOut(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// External capability that splits a local audio file into stem files.
///
/// One invocation processes one track to completion; there are no partial or
/// streaming results.
#[async_trait]
pub trait Separator: Send + Sync {
    /// Separate `track` into stems, returning the song directory
    /// `<output_root>/<model>/<id>/` the stems were written to.
    async fn separate(&self, track: &Path, id: &str) -> Result<PathBuf, SeparateError>;
}

/// `Separator` implementation invoking demucs through the python interpreter.
pub struct DemucsSeparator {
    python: String,
    device: String,
    model: String,
    output_root: PathBuf,
    timeout: Duration,
}

impl DemucsSeparator {
    pub fn new(
        python: impl Into<String>,
        device: impl Into<String>,
        model: impl Into<String>,
        output_root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            python: python.into(),
            device: device.into(),
            model: model.into(),
            output_root: output_root.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Separator for DemucsSeparator {
    async fn separate(&self, track: &Path, id: &str) -> Result<PathBuf, SeparateError> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "demucs", "--device", &self.device, "-n", &self.model])
            .arg("--out")
            .arg(&self.output_root)
            .arg(track)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Separating {:?} with model {}", track, self.model);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(SeparateError::TimedOut(self.timeout.as_secs())),
            Ok(result) => result?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SeparateError::ProcessFailed(stderr.trim().to_string()));
        }

        let song_dir = self.output_root.join(&self.model).join(id);
        debug!("Separation finished, stems in {:?}", song_dir);
        Ok(song_dir)
    }
}
