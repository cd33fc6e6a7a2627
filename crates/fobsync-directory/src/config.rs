use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Where the service-account credentials come from.
///
/// Inline values win over files. Files are re-read on every login so rotated
/// secrets are picked up without a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id_file: PathBuf,
    pub client_secret_file: PathBuf,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Default for ClientCredentials {
    fn default() -> Self {
        Self {
            client_id_file: PathBuf::from("/var/lib/keycloak/client-id"),
            client_secret_file: PathBuf::from("/var/lib/keycloak/client-secret"),
            client_id: None,
            client_secret: None,
        }
    }
}

impl ClientCredentials {
    /// Credentials given directly rather than through files.
    pub fn inline(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            ..Self::default()
        }
    }

    pub fn from_files(client_id_file: impl Into<PathBuf>, client_secret_file: impl Into<PathBuf>) -> Self {
        Self {
            client_id_file: client_id_file.into(),
            client_secret_file: client_secret_file.into(),
            client_id: None,
            client_secret: None,
        }
    }
}

/// Configuration for [`KeycloakClient`](crate::KeycloakClient).
#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    /// Base URL of Keycloak, e.g. `https://sso.example.com`.
    pub base_url: Url,
    /// Realm holding the service account, the group and the webhooks (default: `master`).
    pub realm: String,
    /// Id of the group whose members may hold building access.
    pub group_id: String,
    pub credentials: ClientCredentials,
    /// Members fetched per request (default: 50).
    pub page_size: u32,
    /// Timeout for each HTTP request (default: 30 seconds).
    pub request_timeout: Duration,
}

impl KeycloakConfig {
    /// Creates a configuration with default realm, credentials, paging and timeout.
    #[must_use]
    pub fn new(base_url: Url, group_id: impl Into<String>) -> Self {
        Self {
            base_url,
            realm: "master".into(),
            group_id: group_id.into(),
            credentials: ClientCredentials::default(),
            page_size: 50,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub(crate) fn token_endpoint(&self) -> String {
        format!("{}/realms/{}/protocol/openid-connect/token", self.base(), self.realm)
    }

    pub(crate) fn members_endpoint(&self) -> String {
        format!(
            "{}/admin/realms/{}/groups/{}/members",
            self.base(),
            self.realm,
            self.group_id
        )
    }

    pub(crate) fn webhooks_endpoint(&self) -> String {
        format!("{}/realms/{}/webhooks", self.base(), self.realm)
    }
}
