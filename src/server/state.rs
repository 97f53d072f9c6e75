use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::fetcher::Fetcher;
use crate::library::Library;
use crate::pipeline::Pipeline;

use super::ServerConfig;

pub type SharedPipeline = Arc<Pipeline>;
pub type SharedFetcher = Arc<dyn Fetcher>;
pub type SharedLibrary = Arc<Library>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub pipeline: SharedPipeline,
    pub fetcher: SharedFetcher,
    pub library: SharedLibrary,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        pipeline: SharedPipeline,
        fetcher: SharedFetcher,
        library: SharedLibrary,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            pipeline,
            fetcher,
            library,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for SharedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for SharedFetcher {
    fn from_ref(input: &ServerState) -> Self {
        input.fetcher.clone()
    }
}

impl FromRef<ServerState> for SharedLibrary {
    fn from_ref(input: &ServerState) -> Self {
        input.library.clone()
    }
}
