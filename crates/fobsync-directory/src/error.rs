//! Error types for Keycloak operations.

use std::path::PathBuf;

use fobsync_core::SourceError;

/// Errors that can occur while talking to Keycloak.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// A credential file could not be read.
    #[error("reading {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A network or decoding error from the HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Keycloak answered with a non-success status code.
    #[error("HTTP error: status {status}: {body}")]
    Status { status: u16, body: String },

    /// Obtaining an access token failed.
    #[error("getting token: {0}")]
    Token(#[source] Box<DirectoryError>),
}

impl DirectoryError {
    /// HTTP status if Keycloak answered with an error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Token(inner) => inner.status(),
            _ => None,
        }
    }
}

impl From<DirectoryError> for SourceError {
    fn from(err: DirectoryError) -> Self {
        SourceError::fetch(err)
    }
}
