// src/server.rs

//! HTTP transport over the resolver and the disk cache.
//!
//! ## Routes
//!
//! ```text
//! GET /api/random             one screenshot as a JSON payload, 503 when unavailable
//! GET /storage/{file_name}    stream a claimed disk file, then delete it
//! GET /health                 cache sizes and ban state
//! ```

use std::path::{Component, Path as FsPath};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;

use crate::error::{Result, ServeError};
use crate::models::{Payload, content_type_for_name};
use crate::pipeline::{AvailabilityBreaker, Resolver};
use crate::storage::DiskCache;

const REMOVED_MESSAGE: &str = "Image was removed.";

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    breaker: Arc<AvailabilityBreaker>,
    started_at: Instant,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, breaker: Arc<AvailabilityBreaker>) -> Self {
        Self {
            resolver,
            breaker,
            started_at: Instant::now(),
        }
    }

    fn disk(&self) -> &Arc<DiskCache> {
        self.resolver.disk()
    }
}

/// Health report.
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub memory_items: usize,
    pub disk_items: usize,
    pub banned: bool,
    pub ban_reason: Option<String>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/random", get(random))
        .route("/storage/{file_name}", get(storage_file))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    log::info!("[startup] listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("[startup] server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[startup] failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("[startup] shutdown requested");
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// GET /api/random
async fn random(State(state): State<AppState>) -> std::result::Result<Json<Payload>, ServeError> {
    let servable = state.resolver.resolve().await?;
    let payload = Payload::from(&servable).with_ban_notice(state.breaker.is_banned().await);
    Ok(Json(payload))
}

/// GET /storage/{file_name}
///
/// Only files claimed through the registry are served, each exactly once. The
/// file is deleted once its body is dropped, whether the transfer finished or not.
async fn storage_file(State(state): State<AppState>, Path(file_name): Path<String>) -> Response {
    let Some(file_name) = sanitize_file_name(&file_name) else {
        return not_found();
    };

    let disk = state.disk();
    let Some(entry) = disk.registry().take(file_name).await else {
        return not_found();
    };
    let guard = ServedGuard {
        disk: Arc::clone(disk),
        file_name: file_name.to_string(),
    };
    let path = entry.path;
    let content_type = if entry.content_type.starts_with("image/") {
        entry.content_type
    } else {
        content_type_for_name(file_name).to_string()
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            log::warn!("[disk] cannot open {:?}: {}", path, e);
            return not_found();
        }
    };

    let body = Body::from_stream(ServedStream {
        inner: ReaderStream::new(file),
        _guard: guard,
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        memory_items: state.resolver.memory().len().await,
        disk_items: state.disk().len().await,
        banned: state.breaker.is_banned().await,
        ban_reason: state.breaker.ban_reason().await,
    })
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, REMOVED_MESSAGE).into_response()
}

/// Accept only a single plain, non-hidden path component.
pub fn sanitize_file_name(name: &str) -> Option<&str> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }
    let mut components = FsPath::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Some(name),
        _ => None,
    }
}

/// Schedules `mark_served` for a claimed file when dropped.
struct ServedGuard {
    disk: Arc<DiskCache>,
    file_name: String,
}

impl Drop for ServedGuard {
    fn drop(&mut self) {
        let disk = Arc::clone(&self.disk);
        let file_name = std::mem::take(&mut self.file_name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { disk.mark_served(&file_name).await });
            }
            Err(_) => log::warn!("[disk] no runtime to clean up {}", file_name),
        }
    }
}

/// File body that owns the cleanup guard of the file it streams.
struct ServedStream<S> {
    inner: S,
    _guard: ServedGuard,
}

impl<S: Stream + Unpin> Stream for ServedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
