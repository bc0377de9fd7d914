//! `crossover run`: start the proxy.
//!
//! Loads and validates the config, builds the middleware stack and its
//! background tasks, serves until Ctrl+C / SIGTERM, then signals the tasks
//! and waits for the telemetry queues to drain.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cli::RunArgs;
use crate::config::{self, sources};
use crate::error::CrossoverError;
use crate::logging;
use crate::middleware::MiddlewareStack;
use crate::server::{self, AppState, LoadedConfig};

pub async fn execute(args: RunArgs) -> Result<(), CrossoverError> {
    logging::init(
        &args.log_level,
        logging::resolve_format(args.pretty, args.json),
    );

    let source = sources::resolve(args.config.as_deref()).await?;
    let (config, version) = config::load_validated(source.as_ref()).await?;
    let middleware_names = config.enabled_middleware();
    let upstream = config.upstream.url.clone();

    let http_client = server::build_http_client();

    // Flipped to true once the server has stopped accepting requests.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (stack, tasks) = MiddlewareStack::from_config(&config, &http_client, &shutdown_rx)?;

    let loaded = LoadedConfig::new(
        config,
        version,
        format!("{}:{}", source.name(), source.location()),
    );
    let state = Arc::new(AppState::new(loaded, http_client, stack.clone()));
    let router = server::build_router(state, &stack, args.max_body);
    drop(stack);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        upstream = %upstream,
        middleware = ?middleware_names,
        "crossover started"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    join_background(tasks).await;

    tracing::info!("crossover stopped");
    Ok(())
}

/// Waits for every background task, logging the ones that panicked.
async fn join_background(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task failed");
        }
    }
}
