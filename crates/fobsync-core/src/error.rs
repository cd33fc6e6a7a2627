use std::time::Duration;

use thiserror::Error;

/// Errors returned by a [`DirectorySource`](crate::DirectorySource).
///
/// The refresh driver treats every variant the same way: log, back off, retry.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("directory fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("directory fetch failed: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SourceError {
    /// Wrap any source-specific error as a fetch failure.
    pub fn fetch(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Fetch(err.into())
    }
}
