//! Traffic-management control plane: ingests per-request telemetry from
//! embedded agents, aggregates sliding-window statistics, and answers
//! decision queries with a five-action policy (allow, cache, breaker, queue,
//! shed) plus per-client rate limiting.
//!
//! Grounded on the teacher's `main.rs` shape: `load_env`/`init_tracing` at
//! startup, constructor-injected state built up-front and handed to
//! `with_state`, protected routes gated by `axum::middleware::from_fn_with_state`,
//! background workers spawned with `tokio::spawn`, and a single `axum::serve`
//! call closing out `main`.

mod advisor;
mod aggregator;
mod alerts;
mod api;
mod auth;
mod config;
mod consumer;
mod decision_engine;
mod durable_store;
mod errors;
mod fast_store;
mod middleware;
mod models;
mod queue;
mod rollup;
mod state;
mod threshold_store;
mod tuner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::api_key_auth;
use crate::config::Config;
use crate::consumer::Consumer;
use crate::durable_store::DurableStore;
use crate::fast_store::FastStore;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use crate::queue::Queue;
use crate::state::AppState;
use crate::threshold_store::ThresholdStore;

const CONSUMER_POLL_INTERVAL: Duration = Duration::from_millis(250);
const ROLLUP_TICK_INTERVAL: Duration = Duration::from_secs(60);
const TUNER_INTERVAL: Duration = Duration::from_secs(300);
const QUEUE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(120);

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficctl_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn health_check() -> &'static str {
    "ok"
}

/// Periodically sweep the queue's TTL-expired messages (§4.1: the durable
/// queue carries a 24h message TTL independent of delivery attempts). Exits
/// when `shutdown` fires, matching the cooperative-shutdown contract the
/// other background loops follow (§5).
async fn queue_sweep_loop(
    queue: Arc<Queue>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match queue.sweep_expired() {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "queue sweep: expired messages dropped"),
                    Err(err) => warn!(error = %err, "queue sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("queue sweep loop shutting down");
                return;
            }
        }
    }
}

/// Periodically evict rate limiter entries whose window closed two windows
/// ago, so the per-IP map doesn't grow unbounded under a long-lived process.
async fn rate_limit_cleanup_loop(
    limiter: RateLimitLayer,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => limiter.cleanup(),
            _ = shutdown.changed() => {
                info!("rate limit cleanup loop shutting down");
                return;
            }
        }
    }
}

/// Wait for Ctrl-C (or the process's shutdown signal). A single broadcast
/// fans out to every background worker and to axum's own graceful shutdown
/// future (§5: "a single shutdown signal stops the scheduler, closes the
/// queue channel, and closes the Fast Store connection" — the Fast Store and
/// Queue are in-process, so closing here means every holder of an `Arc` to
/// them is dropped once their owning tasks return).
async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_tracing();

    info!("control plane starting");

    let fast_store = Arc::new(FastStore::new(config.fast_store_capacity));
    let durable_store = Arc::new(DurableStore::new(&config.durable_store_path)?);
    let queue = Arc::new(Queue::new(&config.queue_store_path)?);
    let threshold_store = Arc::new(ThresholdStore::new(durable_store.clone()));

    info!(
        durable_store_path = %config.durable_store_path,
        queue_store_path = %config.queue_store_path,
        "stores initialized"
    );

    let state = Arc::new(AppState {
        fast_store: fast_store.clone(),
        durable_store: durable_store.clone(),
        queue: queue.clone(),
        threshold_store: threshold_store.clone(),
        config: Arc::new(config.clone()),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let consumer = Arc::new(Consumer::new(
        queue.clone(),
        fast_store.clone(),
        durable_store.clone(),
        config.sampling_rate,
    ));
    tokio::spawn(consumer.run(CONSUMER_POLL_INTERVAL, shutdown_rx.clone()));
    tokio::spawn(rollup::run(state.clone(), ROLLUP_TICK_INTERVAL, shutdown_rx.clone()));
    tokio::spawn(tuner::run(state.clone(), TUNER_INTERVAL, shutdown_rx.clone()));
    tokio::spawn(queue_sweep_loop(queue.clone(), QUEUE_SWEEP_INTERVAL, shutdown_rx.clone()));

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    tokio::spawn(rate_limit_cleanup_loop(
        rate_limiter.clone(),
        RATE_LIMIT_CLEANUP_INTERVAL,
        shutdown_rx.clone(),
    ));

    info!("background workers started: consumer, rollup/snapshot/cleanup, tuner, queue sweep, rate limit cleanup");

    // Agent-facing routes (§4.5, §6): both require a valid bearer API key.
    // `api_key_auth`'s own state (the Durable Store) is independent of the
    // router's `AppState`, matching the teacher's pattern of layering
    // `from_fn_with_state` with a narrower state than the router it guards.
    let agent_routes = Router::new()
        .route("/api/signals", post(api::ingest_signal))
        .route("/api/config/:service_name/*endpoint", get(api::get_decision))
        .route_layer(axum_mw::from_fn_with_state(
            durable_store.clone(),
            api_key_auth,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(agent_routes)
        .layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            crate::middleware::logging::request_logging_simple,
        ));

    let addr = format!("0.0.0.0:{}", config.bind_port);
    let listener = TcpListener::bind(&addr).await.context("binding listener")?;
    info!(%addr, "decision/ingest API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await
    .context("server error")?;

    info!("control plane stopped");
    Ok(())
}
