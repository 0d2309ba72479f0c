use thiserror::Error;
use url::Url;

use crate::config::ValidationError;
use crate::transport::TransportError;

/// Result type alias for relay operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors that can occur while relaying an upload or starting the relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// The inbound transfer declared a length of zero. No network call was made.
    #[error("missing content length")]
    LengthRequired,

    #[error("invalid upload target: {0}")]
    InvalidTarget(String),

    /// Every attempt failed before a connection could be established.
    #[error("upload to {url} failed after {attempts} attempts: {source}")]
    Dial {
        url: Url,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The connection was established but the exchange failed.
    #[error("upload to {url} failed: {source}")]
    Network {
        url: Url,
        #[source]
        source: TransportError,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload job {0} failed")]
    JobFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),
}

impl From<rustls::Error> for RelayError {
    fn from(e: rustls::Error) -> Self {
        RelayError::Tls(e.to_string())
    }
}
