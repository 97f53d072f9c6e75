pub mod config;
mod requests_logging;
mod routes;
mod serve_file;
pub mod state;

pub use config::ServerConfig;
pub use requests_logging::{log_requests, RequestsLoggingLevel};
pub use routes::{make_app, run_server};
