use async_trait::async_trait;

use crate::entry::PrincipalRecord;
use crate::error::SourceError;

/// Where the authorization list comes from.
///
/// Implementations must tolerate being called repeatedly and own any
/// credential/token lifecycle they need. The refresh driver bounds each call
/// with its own timeout.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Fetch every principal that may hold building access.
    async fn list_principals(&self) -> Result<Vec<PrincipalRecord>, SourceError>;
}
