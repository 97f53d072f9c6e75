//! Stembox Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod fetcher;
pub mod library;
pub mod pipeline;
pub mod separator;
pub mod server;
pub mod workspace;

// Re-export commonly used types for convenience
pub use fetcher::{Fetcher, SearchResult, YtDlpFetcher};
pub use library::{Library, SongEntry, SongMeta};
pub use pipeline::{Pipeline, ProcessOutcome};
pub use separator::{DemucsSeparator, Separator};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use workspace::Workspace;
