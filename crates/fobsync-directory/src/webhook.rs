use serde::{Deserialize, Serialize};

/// Event types fobsync subscribes to: any admin change may affect group membership.
pub const ADMIN_EVENT_TYPES: &[&str] = &["admin.*"];

/// A webhook as understood by the Keycloak events extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
}

impl Webhook {
    /// An enabled webhook for admin events pointing at `url`.
    pub fn for_admin_events(url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            enabled: true,
            url: url.into(),
            event_types: ADMIN_EVENT_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// What [`ensure_webhook`](crate::KeycloakClient::ensure_webhook) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRegistration {
    AlreadyPresent,
    Created,
}

/// The URL Keycloak should call for a service reachable at `callback_url`.
pub fn webhook_target(callback_url: &str) -> String {
    format!("{}/webhook", callback_url.trim_end_matches('/'))
}
