//! Keycloak as the source of truth for building access.
//!
//! - [`KeycloakClient`] pages through the members of the trusted group and
//!   implements [`fobsync_core::DirectorySource`].
//! - Access tokens are obtained with the client-credentials grant and reused
//!   until half their lifetime has passed.
//! - [`KeycloakClient::ensure_webhook`] makes sure Keycloak notifies fobsync
//!   of admin changes, without creating duplicates.

pub mod client;
pub mod config;
pub mod error;
mod token;
pub mod webhook;

pub use client::KeycloakClient;
pub use config::{ClientCredentials, KeycloakConfig};
pub use error::DirectoryError;
pub use webhook::{Webhook, WebhookRegistration};
