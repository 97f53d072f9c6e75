use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;
use tracing::error;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::fetcher::SearchResult;
use crate::library::{Library, LibraryError};
use crate::pipeline::Pipeline;

use super::serve_file::{serve_path, serve_song_file, Disposition};
use super::state::*;
use super::{log_requests, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Deserialize, Debug)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Deserialize, Debug)]
struct ProcessBody {
    pub url: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
}

#[derive(Serialize)]
struct ProcessedSong {
    id: String,
    title: String,
}

#[derive(Serialize)]
struct ProcessResponse {
    status: &'static str,
    song: ProcessedSong,
    stems: Vec<String>,
}

#[derive(Serialize)]
struct LibraryResponse {
    items: Vec<crate::library::SongEntry>,
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn api_search(
    State(config): State<ServerConfig>,
    State(fetcher): State<SharedFetcher>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.q.trim();
    if query.is_empty() {
        return Json(SearchResponse { results: vec![] }).into_response();
    }

    match fetcher.search(query, config.search_results).await {
        Ok(results) => Json(SearchResponse { results }).into_response(),
        Err(err) => {
            error!("Search for {:?} failed: {}", query, err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn api_process(
    State(pipeline): State<SharedPipeline>,
    Json(body): Json<ProcessBody>,
) -> Response {
    let (url, id) = match (
        body.url.filter(|u| !u.is_empty()),
        body.id.filter(|i| !i.is_empty()),
    ) {
        (Some(url), Some(id)) => (url, id),
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing url or id"),
    };
    let title = body.title.filter(|t| !t.is_empty()).unwrap_or_else(|| id.clone());

    match pipeline.process(&url, &id, &title).await {
        Ok(outcome) => Json(ProcessResponse {
            status: "done",
            song: ProcessedSong {
                id: outcome.id,
                title: outcome.title,
            },
            stems: outcome.stems,
        })
        .into_response(),
        Err(err) => {
            error!("Processing {} failed: {}", id, err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Processing failed: {}", err),
            )
        }
    }
}

async fn api_library(State(library): State<SharedLibrary>) -> Response {
    Json(LibraryResponse {
        items: library.list(),
    })
    .into_response()
}

async fn api_stems(State(library): State<SharedLibrary>, Path(id): Path<String>) -> Response {
    match library.get(&id) {
        Ok(entry) => Json(entry).into_response(),
        Err(LibraryError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Not found")
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn download_file(
    State(library): State<SharedLibrary>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    serve_song_file(&library, &id, &filename, Disposition::Attachment).await
}

async fn stream_audio(
    State(library): State<SharedLibrary>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    serve_song_file(&library, &id, &filename, Disposition::Inline).await
}

async fn download_zip(State(library): State<SharedLibrary>, Path(id): Path<String>) -> Response {
    let zip_path = match library.archive(&id) {
        Ok(path) => path,
        Err(err) => {
            error!("Could not build archive for {}: {}", id, err);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let name = format!("{}.zip", id);
    serve_path(&zip_path, &name, Disposition::Attachment).await
}

pub fn make_app(
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    fetcher: SharedFetcher,
    library: Library,
) -> Router {
    let state = ServerState::new(config.clone(), pipeline, fetcher, Arc::new(library));

    let api_routes: Router = Router::new()
        .route("/search", get(api_search))
        .route("/process", post(api_process))
        .route("/library", get(api_library))
        .route("/stems/{id}", get(api_stems))
        .with_state(state.clone());

    let file_routes: Router = Router::new()
        .route("/download/{id}/{filename}", get(download_file))
        .route("/audio/{id}/{filename}", get(stream_audio))
        .route("/download_zip/{id}", get(download_zip))
        .with_state(state.clone());

    let home_router: Router = match &config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .nest("/api", api_routes)
        .merge(file_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    fetcher: SharedFetcher,
    library: Library,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, pipeline, fetcher, library);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}
