//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding config, HTTP
//! client, stats, and the enabled middleware), [`build_router`] for
//! assembling `/health` and the middleware-wrapped proxy fallback,
//! [`build_http_client`] for the connection-pooled hyper client, and
//! [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::model::Config;
use crate::config::ConfigVersion;
use crate::health::health_handler;
use crate::middleware::MiddlewareStack;
use crate::proxy;

#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Arc<Config>,
    pub version: ConfigVersion,
    pub source: String,
    pub loaded_at: Instant,
}

impl LoadedConfig {
    #[must_use]
    pub fn new(config: Config, version: ConfigVersion, source: String) -> Self {
        Self {
            config: Arc::new(config),
            version,
            source,
            loaded_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
}

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, http_body_util::Full<bytes::Bytes>>;

pub struct AppState {
    pub config: LoadedConfig,
    pub http_client: HttpClient,
    pub start_time: Instant,
    pub stats: Stats,
    pub middleware: MiddlewareStack,
}

impl AppState {
    #[must_use]
    pub fn new(config: LoadedConfig, http_client: HttpClient, middleware: MiddlewareStack) -> Self {
        Self {
            config,
            http_client,
            start_time: Instant::now(),
            stats: Stats::default(),
            middleware,
        }
    }
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // Both ring and aws-lc-rs may be compiled in; pick ring explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

/// `/health` is served directly; everything else passes through the
/// middleware in `stack` before reaching the upstream forwarder.
///
/// `max_body` caps proxied bodies only while activity tracking is off. With
/// it on, the tracker's own ceiling bounds what is read and larger bodies are
/// truncated rather than rejected.
pub fn build_router(state: Arc<AppState>, stack: &MiddlewareStack, max_body: usize) -> Router {
    let mut proxied: Router = stack
        .apply(Router::new().fallback(proxy::forward_handler))
        .with_state(Arc::clone(&state));
    if stack.activity.is_none() {
        proxied = proxied.layer(RequestBodyLimitLayer::new(max_body));
    }

    Router::new()
        .route("/health", get(health_handler))
        .fallback_service(proxied)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
