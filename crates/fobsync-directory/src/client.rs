//! Keycloak admin API client.

use async_trait::async_trait;
use fobsync_core::{DirectorySource, PrincipalRecord, SourceError};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::KeycloakConfig;
use crate::error::DirectoryError;
use crate::token::TokenManager;
use crate::webhook::{Webhook, WebhookRegistration, webhook_target};

/// Client for the parts of the Keycloak admin API fobsync needs.
pub struct KeycloakClient {
    http: reqwest::Client,
    config: KeycloakConfig,
    tokens: TokenManager,
}

impl KeycloakClient {
    /// Creates a client; no request is made until first use.
    pub fn new(config: KeycloakConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let tokens = TokenManager::new(http.clone(), &config);
        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    /// Every member of the trusted group, fetched page by page until an empty page.
    pub async fn list_group_members(&self) -> Result<Vec<PrincipalRecord>, DirectoryError> {
        let endpoint = self.config.members_endpoint();
        let max = self.config.page_size.max(1);
        let mut first: usize = 0;
        let mut members = Vec::new();

        loop {
            let query = [("first", first.to_string()), ("max", max.to_string())];
            let page: Vec<PrincipalRecord> = self.get_json(&endpoint, &query).await?;
            if page.is_empty() {
                break;
            }
            first += page.len();
            members.extend(page);
        }

        tracing::debug!(members = members.len(), "listed group members");
        Ok(members)
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, DirectoryError> {
        let query: [(&str, String); 0] = [];
        self.get_json(&self.config.webhooks_endpoint(), &query).await
    }

    pub async fn create_webhook(&self, webhook: &Webhook) -> Result<(), DirectoryError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(self.config.webhooks_endpoint())
            .bearer_auth(token)
            .json(webhook)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Make sure Keycloak calls `{callback_url}/webhook` on admin events.
    ///
    /// Idempotent: an existing webhook with the same URL is left alone.
    pub async fn ensure_webhook(&self, callback_url: &str) -> Result<WebhookRegistration, DirectoryError> {
        let target = webhook_target(callback_url);
        let existing = self.list_webhooks().await?;

        if existing.iter().any(|hook| hook.url == target) {
            tracing::info!(url = %target, "webhook already registered");
            return Ok(WebhookRegistration::AlreadyPresent);
        }

        self.create_webhook(&Webhook::for_admin_events(target.clone()))
            .await?;
        tracing::info!(url = %target, "registered webhook");
        Ok(WebhookRegistration::Created)
    }

    async fn get_json<T, Q>(&self, url: &str, query: &Q) -> Result<T, DirectoryError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Turn non-success responses into errors; a 401 also drops the cached token.
    async fn check(&self, response: Response) -> Result<Response, DirectoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(DirectoryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DirectorySource for KeycloakClient {
    async fn list_principals(&self) -> Result<Vec<PrincipalRecord>, SourceError> {
        Ok(self.list_group_members().await?)
    }
}
