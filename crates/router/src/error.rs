//! Router error types
//!
//! These stay inside the router: `navigate_to` folds every failure into a
//! `NavigationOutcome`, nothing here crosses the public navigation surface.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("DOM error: {0}")]
    Dom(#[from] dom::DomError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Result type for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
