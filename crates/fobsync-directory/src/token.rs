//! Service-account token lifecycle.
//!
//! Tokens come from the client-credentials grant. A token is reused while it is
//! younger than half its advertised lifetime; renewal is serialized so that
//! concurrent callers share a single login.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::{ClientCredentials, KeycloakConfig};
use crate::error::DirectoryError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    fetched_at: Instant,
    lifetime: Duration,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.lifetime / 2
    }
}

pub(crate) struct TokenManager {
    http: reqwest::Client,
    endpoint: String,
    credentials: ClientCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub(crate) fn new(http: reqwest::Client, config: &KeycloakConfig) -> Self {
        Self {
            http,
            endpoint: config.token_endpoint(),
            credentials: config.credentials.clone(),
            cached: Mutex::new(None),
        }
    }

    /// A valid bearer token, logging in again when the cached one is stale.
    pub(crate) async fn access_token(&self) -> Result<String, DirectoryError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }

        let token = self
            .login()
            .await
            .map_err(|e| DirectoryError::Token(Box::new(e)))?;
        tracing::info!(
            expires_in_secs = token.lifetime.as_secs(),
            "fetched new auth token from keycloak"
        );
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token, e.g. after Keycloak rejected it.
    pub(crate) async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn login(&self) -> Result<CachedToken, DirectoryError> {
        let client_id = resolve(&self.credentials.client_id, &self.credentials.client_id_file).await?;
        let client_secret =
            resolve(&self.credentials.client_secret, &self.credentials.client_secret_file).await?;

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];

        let fetched_at = Instant::now();
        let response = self.http.post(&self.endpoint).form(&params).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status { status, body });
        }

        let body: TokenResponse = response.json().await?;
        Ok(CachedToken {
            access_token: body.access_token,
            fetched_at,
            lifetime: Duration::from_secs(body.expires_in),
        })
    }
}

async fn resolve(inline: &Option<String>, file: &Path) -> Result<String, DirectoryError> {
    if let Some(value) = inline {
        return Ok(value.clone());
    }
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|source| DirectoryError::Credentials {
            path: file.to_path_buf(),
            source,
        })?;
    Ok(raw.trim().to_string())
}
