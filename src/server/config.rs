use super::RequestsLoggingLevel;

/// Server-level settings carried in [`super::state::ServerState`].
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    pub port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
    /// Path to a frontend directory to be statically served, if any.
    pub frontend_dir_path: Option<String>,
    /// Maximum number of results returned by a search request.
    pub search_results: usize,
}
