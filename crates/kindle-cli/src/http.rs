//! Dashboard feed: engine status, the event log, and a live event stream.
//!
//! ```text
//! GET /health
//! GET /api/status
//! GET /api/events?limit=N
//! GET /api/stream          (server-sent events, one per tick event)
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use futures_util::Stream;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::runtime::SharedRuntime;

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct FeedState {
    runtime: SharedRuntime,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    limit: Option<usize>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}

pub fn create_router(runtime: SharedRuntime, shutdown: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .route("/api/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(FeedState { runtime, shutdown })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "kindle",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<FeedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let rt = state.runtime.lock().await;
    let store = rt.store();
    Ok(Json(serde_json::json!({
        "instance": rt.instance(),
        "instance_id": rt.engine().id(),
        "status": rt.status(),
        "pending": rt.pending(),
        "graph": {
            "nodes": store.node_count().map_err(internal)?,
            "links": store.link_count().map_err(internal)?,
            "total_energy": store.total_energy().map_err(internal)?,
        },
    })))
}

async fn events(
    State(state): State<FeedState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let rt = state.runtime.lock().await;
    let events = rt.store().recent_events(limit).map_err(internal)?;
    Ok(Json(serde_json::json!({
        "count": events.len(),
        "events": events,
    })))
}

/// Every tick event as it happens. The SSE event name is the mechanism.
async fn stream(State(state): State<FeedState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.runtime.lock().await.subscribe();
    let shutdown = state.shutdown.clone();
    tracing::debug!("feed subscriber connected");

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = rx.recv() => match result {
                    Ok(event) => match Event::default()
                        .event(event.detail.mechanism())
                        .json_data(&event)
                    {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => tracing::warn!("failed to encode tick event: {e}"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "feed subscriber lagged, skipped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("feed subscriber disconnected");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Tick the runtime every `every` until `shutdown` fires. A failed tick is
/// logged and retried on the next beat with its stimuli still queued.
pub fn spawn_ticker(
    runtime: SharedRuntime,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let mut rt = runtime.lock().await;
                    if let Err(e) = rt.tick(None) {
                        tracing::warn!("tick failed, will retry: {e:#}");
                    }
                }
            }
        }
        tracing::debug!("ticker stopped");
    })
}

pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    use anyhow::Context;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serve the feed on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    runtime: SharedRuntime,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(runtime, shutdown.clone());
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("dashboard feed listening on http://{addr}");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
