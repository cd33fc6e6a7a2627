use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use fobsync_core::{
    DirectorySource, RefreshDriver, RefreshTrigger, SnapshotStore, TriggerReceiver, TriggerSource,
    refresh_channel, spawn_periodic_trigger,
};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers, middleware as app_middleware};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub trigger: RefreshTrigger,
    /// Upper bound for `?wait=`
    pub max_wait: Duration,
    /// Flips to `true` on shutdown so long-polls return early.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<SnapshotStore>,
        trigger: RefreshTrigger,
        max_wait: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            trigger,
            max_wait,
            shutdown,
        }
    }
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        // Door controller API
        .route("/v1/fobs", get(handlers::list_fobs))
        .route("/v1/events", post(handlers::record_event))
        // Keycloak admin-event webhook
        .route("/webhook", post(handlers::webhook))
        .with_state(state)
        // Middleware stack, outermost first: request id -> trace -> compression
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<app_middleware::RequestId>()
                                .map(|id| id.as_str().to_string())
                                .unwrap_or_default();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CompressionLayer::new()),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    source: Option<Arc<dyn DirectorySource>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            source: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Where principals are fetched from, usually a `KeycloakClient`.
    pub fn with_source(mut self, source: Arc<dyn DirectorySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> anyhow::Result<FobsyncServer> {
        self.config.validate().map_err(anyhow::Error::msg)?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("no directory source configured"))?;

        let store = SnapshotStore::new_shared();
        let (trigger, triggers) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = RefreshDriver::new(
            source,
            store.clone(),
            self.config.entry_mapping(),
            &self.config.driver_config(),
        );
        let state = AppState::new(
            store.clone(),
            trigger.clone(),
            self.config.server.max_wait,
            shutdown_rx,
        );
        let app = build_app(&self.config, state);

        Ok(FobsyncServer {
            addr: self.addr,
            app,
            store,
            trigger,
            triggers,
            driver,
            shutdown: shutdown_tx,
            resync_interval: self.config.sync.resync_interval,
            refresh_on_startup: self.config.sync.refresh_on_startup,
        })
    }
}

pub struct FobsyncServer {
    addr: SocketAddr,
    app: Router,
    store: Arc<SnapshotStore>,
    trigger: RefreshTrigger,
    triggers: TriggerReceiver,
    driver: RefreshDriver<dyn DirectorySource>,
    shutdown: watch::Sender<bool>,
    resync_interval: Duration,
    refresh_on_startup: bool,
}

impl FobsyncServer {
    pub fn store(&self) -> Arc<SnapshotStore> {
        self.store.clone()
    }

    /// Bind the configured address and serve until Ctrl+C.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        self.serve(listener, shutdown_signal()).await
    }

    /// Start the refresh machinery and serve on `listener` until `signal` resolves.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown_rx = self.shutdown.subscribe();
        let driver = self.driver.spawn(self.triggers, shutdown_rx.clone());
        let ticker = spawn_periodic_trigger(
            self.trigger.clone(),
            self.resync_interval,
            shutdown_rx,
        );
        if self.refresh_on_startup {
            self.trigger.fire(TriggerSource::Startup);
        }

        // Long-polls observe the flag, so flip it before axum waits for open requests.
        let shutdown = self.shutdown;
        let result = axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                signal.await;
                let _ = shutdown.send(true);
            })
            .await;

        let (driver, ticker) = tokio::join!(driver, ticker);
        result?;
        driver.map_err(|e| anyhow::anyhow!("refresh driver task failed: {e}"))?;
        ticker.map_err(|e| anyhow::anyhow!("periodic trigger task failed: {e}"))?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
