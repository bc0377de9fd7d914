//! Shared helpers: real axum servers on 127.0.0.1:0 standing in for the
//! upstream, the collectors and the subscription service.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Router;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crossover::config::model::{Config, Defaults, Upstream};
use crossover::config::ConfigVersion;
use crossover::middleware::MiddlewareStack;
use crossover::server::{self, AppState, LoadedConfig};

pub async fn spawn(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();
    });

    (addr, shutdown_tx)
}

/// Upstream that echoes the body and reports what it saw in headers.
pub async fn spawn_echo_upstream() -> (SocketAddr, oneshot::Sender<()>) {
    async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
        let mut seen = HeaderMap::new();
        for (from, to) in [
            ("content-length", "x-seen-content-length"),
            ("x-uuid", "x-seen-uuid"),
            ("via", "x-seen-via"),
        ] {
            if let Some(value) = headers.get(from) {
                seen.insert(to, value.clone());
            }
        }
        seen.insert("x-seen-body-len", HeaderValue::from(body.len()));
        (seen, body)
    }

    spawn(Router::new().fallback(echo)).await
}

/// Collector that forwards every received JSON payload and its API key.
pub async fn spawn_collector(
    path: &str,
) -> (
    SocketAddr,
    oneshot::Sender<()>,
    mpsc::UnboundedReceiver<(Option<String>, serde_json::Value)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        path,
        axum::routing::post(
            |axum::extract::State(tx): axum::extract::State<
                mpsc::UnboundedSender<(Option<String>, serde_json::Value)>,
            >,
             headers: HeaderMap,
             axum::Json(payload): axum::Json<serde_json::Value>| async move {
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let _ = tx.send((key, payload));
                axum::http::StatusCode::OK
            },
        ),
    );
    let (addr, shutdown) = spawn(router.with_state(tx)).await;
    (addr, shutdown, rx)
}

pub fn base_config(upstream: SocketAddr) -> Config {
    Config {
        upstream: Upstream {
            url: format!("http://{upstream}"),
            timeout: 5_000,
        },
        defaults: Defaults::default(),
        activity: None,
        rate_limit: None,
    }
}

pub struct Proxy {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    server: oneshot::Sender<()>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Proxy {
    pub async fn start(config: Config) -> Self {
        Self::start_with_max_body(config, 1_048_576).await
    }

    pub async fn start_with_max_body(config: Config, max_body: usize) -> Self {
        let client = server::build_http_client();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (stack, tasks) = MiddlewareStack::from_config(&config, &client, &shutdown_rx).unwrap();
        let loaded = LoadedConfig::new(config, ConfigVersion::Hash("test-hash".into()), "test".into());
        let state = Arc::new(AppState::new(loaded, client, stack.clone()));
        let router = server::build_router(Arc::clone(&state), &stack, max_body);
        let (addr, server) = spawn(router).await;
        Self {
            addr,
            state,
            server,
            shutdown,
            tasks,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Stops the server, signals the background tasks and waits for them.
    pub async fn stop(self) {
        let _ = self.server.send(());
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("channel closed")
}
