use std::{env, sync::Arc};

use fobsync_directory::KeycloakClient;
use fobsync_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use fobsync_server::{ServerBuilder, shutdown_tracing};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From FOBSYNC_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (fobsync.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (FOBSYNC_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    fobsync_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );

    fobsync_server::observability::apply_logging_level(&cfg.logging.level);

    let keycloak = match cfg.keycloak_config().map_err(anyhow::Error::msg).and_then(|kc| {
        KeycloakClient::new(kc).map_err(anyhow::Error::from)
    }) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Keycloak client initialization failed: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        url = %keycloak.config().base_url,
        realm = %keycloak.config().realm,
        group_id = %keycloak.config().group_id,
        "Keycloak directory configured"
    );

    if let Some(callback_url) = cfg.webhook.callback_url.as_deref() {
        if let Err(e) = keycloak.ensure_webhook(callback_url).await {
            eprintln!("Webhook registration failed: {e}");
            std::process::exit(2);
        }
    }

    let server = match ServerBuilder::new()
        .with_config(cfg)
        .with_source(keycloak)
        .build()
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        shutdown_tracing();
        std::process::exit(1);
    }

    shutdown_tracing();
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: FOBSYNC_CONFIG
/// 3. Default: fobsync.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("FOBSYNC_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
