use std::{net::SocketAddr, path::PathBuf, time::Duration};

use fobsync_core::{DEFAULT_RETRY_FLOOR, DriverConfig, EntryMapping};
use fobsync_directory::{ClientCredentials, KeycloakConfig};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Refresh loop timing
    #[serde(default)]
    pub sync: SyncConfig,
    /// Keycloak connection and the trusted group
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Which user attributes carry credentials and approval
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.max_wait.is_zero() {
            return Err("server.max_wait must be > 0".into());
        }
        // Sync validations
        if self.sync.resync_interval.is_zero() {
            return Err("sync.resync_interval must be > 0".into());
        }
        if self.sync.fetch_timeout.is_zero() {
            return Err("sync.fetch_timeout must be > 0".into());
        }
        if self.sync.retry_floor.is_zero() {
            return Err("sync.retry_floor must be > 0".into());
        }
        if self.sync.retry_floor > self.sync.resync_interval {
            return Err("sync.retry_floor must be <= sync.resync_interval".into());
        }
        // Directory validations
        if self.directory.url.is_none() {
            return Err("directory.url is required".into());
        }
        if self.directory.group_id.trim().is_empty() {
            return Err("directory.group_id is required".into());
        }
        if self.directory.realm.trim().is_empty() {
            return Err("directory.realm must not be empty".into());
        }
        if self.directory.page_size == 0 {
            return Err("directory.page_size must be > 0".into());
        }
        // Mapping validation
        let m = &self.mapping;
        if [&m.fob_attribute, &m.qr_attribute, &m.approval_attribute]
            .iter()
            .any(|name| name.trim().is_empty())
        {
            return Err("mapping attribute names must not be empty".into());
        }
        // Webhook validation
        if let Some(callback) = self.webhook.callback_url.as_deref() {
            Url::parse(callback)
                .map_err(|e| format!("webhook.callback_url is not a valid URL: {e}"))?;
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            resync_interval: self.sync.resync_interval,
            fetch_timeout: self.sync.fetch_timeout,
            retry_floor: self.sync.retry_floor,
        }
    }

    pub fn entry_mapping(&self) -> EntryMapping {
        EntryMapping {
            fob_attribute: self.mapping.fob_attribute.clone(),
            qr_attribute: self.mapping.qr_attribute.clone(),
            approval_attribute: self.mapping.approval_attribute.clone(),
            entry_ttl: self.mapping.entry_ttl,
        }
    }

    /// Settings for the Keycloak client. Fails when no directory URL is configured.
    pub fn keycloak_config(&self) -> Result<KeycloakConfig, String> {
        let dir = &self.directory;
        let url = dir
            .url
            .clone()
            .ok_or_else(|| String::from("directory.url is required"))?;
        let credentials = ClientCredentials {
            client_id_file: dir.client_id_file.clone(),
            client_secret_file: dir.client_secret_file.clone(),
            client_id: dir.client_id.clone(),
            client_secret: dir.client_secret.clone(),
        };
        Ok(KeycloakConfig::new(url, dir.group_id.clone())
            .with_realm(dir.realm.clone())
            .with_credentials(credentials)
            .with_page_size(dir.page_size)
            .with_request_timeout(dir.request_timeout))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Longest a long-poll request may hold; larger `wait` values are clamped.
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}
fn default_max_wait() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            max_wait: default_max_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Resync even when no webhook arrives. Also caps retry delays.
    #[serde(with = "humantime_serde")]
    pub resync_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_floor: Duration,
    /// Fill the cache as soon as the server starts.
    pub refresh_on_startup: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let driver = DriverConfig::default();
        Self {
            resync_interval: driver.resync_interval,
            fetch_timeout: driver.fetch_timeout,
            retry_floor: DEFAULT_RETRY_FLOOR,
            refresh_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of Keycloak
    pub url: Option<Url>,
    pub realm: String,
    /// Id of the trusted group
    pub group_id: String,
    pub client_id_file: PathBuf,
    pub client_secret_file: PathBuf,
    /// Inline credentials take precedence over the files; meant for local development.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub page_size: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let creds = ClientCredentials::default();
        Self {
            url: None,
            realm: "master".into(),
            group_id: String::new(),
            client_id_file: creds.client_id_file,
            client_secret_file: creds.client_secret_file,
            client_id: None,
            client_secret: None,
            page_size: 50,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub fob_attribute: String,
    pub qr_attribute: String,
    pub approval_attribute: String,
    /// TTL handed to door controllers with every entry
    #[serde(with = "humantime_serde")]
    pub entry_ttl: Duration,
}

impl Default for MappingConfig {
    fn default() -> Self {
        let mapping = EntryMapping::default();
        Self {
            fob_attribute: mapping.fob_attribute,
            qr_attribute: mapping.qr_attribute,
            approval_attribute: mapping.approval_attribute,
            entry_ttl: mapping.entry_ttl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// URL at which Keycloak can reach this service. Registration is skipped when unset.
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "fobsync.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FOBSYNC__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("FOBSYNC")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
