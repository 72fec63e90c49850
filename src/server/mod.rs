//! HTTP surface and process lifecycle.
//!
//! [`router`] wires the endpoints and middleware. [`serve`] runs the whole
//! service on a bound listener:
//!
//! 1. start the pipeline and accept requests (`Running`)
//! 2. on the shutdown future, flip to `Draining`: ingestion refuses new work
//!    and the listener stops accepting connections
//! 3. give in-flight HTTP requests the grace period to finish
//! 4. close the work queue and drain processing and dispatch, bounded by the
//!    drain timeout
//! 5. report and mark `Stopped`

pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::ingest::Ingress;
use crate::pipeline::processing::Processor;
use crate::pipeline::{DrainReport, Pipeline};
use crate::shutdown::ShutdownCoordinator;

/// Read and write timeout for a single HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ingress: Ingress,
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/webhook", post(handlers::webhook))
        .route("/subscriber", post(handlers::subscriber))
        .layer(middleware::from_fn(log_remote_addr))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Log who is calling. Connection info is absent when the router is driven
/// without a listener, as in tests.
async fn log_remote_addr(req: Request, next: Next) -> Response {
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => {
            info!(remote = %addr, method = %req.method(), path = req.uri().path(), "request")
        }
        None => info!(method = %req.method(), path = req.uri().path(), "request"),
    }
    next.run(req).await
}

/// Run the service until `shutdown` resolves, then drain and return.
///
/// # Errors
///
/// Only startup failures are returned. Problems during shutdown are logged and
/// the sequence carries on, so this always finishes.
pub async fn serve<P, S>(
    listener: TcpListener,
    config: &Config,
    processor: P,
    shutdown: S,
) -> Result<DrainReport>
where
    P: Processor,
    S: Future<Output = ()> + Send + 'static,
{
    let pipeline = Pipeline::start(config.pipeline(), processor)?;
    let coordinator = ShutdownCoordinator::new();
    let state = AppState {
        ingress: Ingress::new(&pipeline, coordinator.clone()),
    };
    let app = router(state);

    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let mut server = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { coordinator.drain_started().await })
            .await
        }
    });

    let signal = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            shutdown.await;
            coordinator.begin_drain();
        }
    });

    let mut server_done = false;
    tokio::select! {
        () = coordinator.drain_started() => {}
        result = &mut server => {
            server_done = true;
            log_server_exit(result);
            error!("listener stopped unexpectedly, shutting down");
            coordinator.begin_drain();
        }
    }
    signal.abort();

    if !server_done {
        info!(
            grace_secs = config.shutdown_grace.as_secs_f64(),
            "waiting for in-flight requests"
        );
        match tokio::time::timeout(config.shutdown_grace, &mut server).await {
            Ok(result) => log_server_exit(result),
            Err(_) => {
                error!("listener did not stop within the grace period, forcing it down");
                server.abort();
            }
        }
    }

    let report = pipeline.drain(config.drain_timeout).await;
    coordinator.mark_stopped();
    Ok(report)
}

fn log_server_exit(result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("listener stopped"),
        Ok(Err(e)) => error!(error = %e, "listener failed"),
        Err(e) => error!(error = %e, "listener task failed"),
    }
}
