//! Streamed file responses for stem and archive downloads.
//!
//! Every failure mode (missing song, missing file, traversal attempt, IO
//! error) collapses to a bare 404 so no filesystem detail leaks out.

use std::path::Path;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::{fs::File, io::BufReader};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::library::Library;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Served for in-browser playback.
    Inline,
    /// Served as a file download.
    Attachment,
}

fn content_type_for(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Serve a file from inside a song's canonical directory, going through the
/// library's traversal-safe resolution.
pub async fn serve_song_file(
    library: &Library,
    id: &str,
    name: &str,
    disposition: Disposition,
) -> Response {
    let path = match library.resolve_file(id, name) {
        Ok(path) => path,
        Err(err) => {
            debug!("Refusing to serve {}/{}: {}", id, name, err);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    serve_path(&path, name, disposition).await
}

/// Stream an already-resolved file.
pub async fn serve_path(path: &Path, download_name: &str, disposition: Disposition) -> Response {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let length = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let stream = ReaderStream::new(BufReader::new(file));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(download_name))
        .header(header::CONTENT_LENGTH, length);
    if disposition == Disposition::Attachment {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download_name),
        );
    }

    match builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
