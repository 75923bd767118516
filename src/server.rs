//!
//! minee HTTP server
//! -----------------
//! Axum application around the `Engine`. Every request goes through a single
//! fallback handler: the path is percent-decoded and validated, the directory
//! listing format negotiated, then resolution and any write run on the blocking
//! pool since they touch the filesystem and may evaluate scripts.
//!
//! Middleware:
//! - response headers: `Content-Type` by file suffix when the resource did not
//!   set one, and a 30-day `Cache-Control` for cacheable static suffixes
//! - request log: `method uri status elapsed` (optional)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{error, info};

use crate::assets::StaticAssets;
use crate::config::ServerConfig;
use crate::engine::{Engine, EngineRequest};
use crate::error::AppError;
use crate::registry::{manifest, EntityRegistry};
use crate::resource::{Listing, Reply};
use crate::scripts::LuaSandbox;
use crate::storage::{paths, FsTree};

const CACHE_MAX_AGE: &str = "public, max-age=2592000";

/// Shared server state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

pub fn build_router(engine: Engine, log_requests: bool) -> Router {
    let app = Router::new()
        .fallback(serve)
        .with_state(AppState { engine })
        .layer(middleware::from_fn(response_headers));
    if log_requests {
        app.layer(middleware::from_fn(request_log))
    } else {
        app
    }
}

async fn serve(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let req = match engine_request(method, &uri, &headers, body) {
        Ok(r) => r,
        Err(e) => return Reply::from_error(&e).into_response(),
    };
    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.handle(&req)).await {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            error!(target: "minee::http", "request task failed: {}", e);
            Reply::from_error(&AppError::internal(e.to_string())).into_response()
        }
    }
}

fn engine_request(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Result<EngineRequest, AppError> {
    let path = urlencoding::decode(uri.path())
        .map_err(|e| AppError::bad_request(format!("path is not valid UTF-8: {}", e)))?;
    let path = paths::normalize(&path);
    paths::validate_request_path(&path).map_err(|e| AppError::bad_request(e.to_string()))?;
    let header_str = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    let accept = header_str(header::ACCEPT);
    Ok(EngineRequest {
        method,
        path,
        listing: Listing::negotiate(uri.query(), accept.as_deref()),
        content_type: header_str(header::CONTENT_TYPE),
        body,
    })
}

/// Content type by request path suffix.
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, e)| e)?;
    let ct = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" | "md" => "text/plain",
        _ => return None,
    };
    Some(ct)
}

fn cacheable(path: &str) -> bool {
    matches!(
        path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).as_deref(),
        Some("css" | "js" | "mjs" | "svg" | "png" | "jpg" | "jpeg" | "gif" | "ico" | "woff" | "woff2")
    )
}

async fn response_headers(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;
    if !resp.status().is_success() {
        return resp;
    }
    let headers = resp.headers_mut();
    if !headers.contains_key(header::CONTENT_TYPE) {
        if let Some(ct) = content_type_for(&path) {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
    }
    if cacheable(&path) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_MAX_AGE));
    }
    resp
}

async fn request_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();
    let resp = next.run(req).await;
    info!(target: "minee::http", "{} {} {} {:?}", method, uri, resp.status().as_u16(), started.elapsed());
    resp
}

fn log_startup_folders(cfg: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    info!(
        target: "startup",
        "minee starting. Folder configuration: cwd={:?}, static_root={:?} (exists={}), business_root={:?} (exists={}), user_root={:?} (exists={})",
        cwd,
        cfg.static_root, cfg.static_root.exists(),
        cfg.business_root, cfg.business_root.exists(),
        cfg.user_root, cfg.user_root.exists()
    );
}

/// Build the engine from configuration: trees, preloaded assets, type manifest.
pub fn build_engine(cfg: &ServerConfig, mut registry: EntityRegistry) -> anyhow::Result<Engine> {
    let user = FsTree::new(&cfg.user_root)
        .with_context(|| format!("Failed to create or access user root: {}", cfg.user_root.display()))?;
    let business = FsTree::new(&cfg.business_root)
        .with_context(|| format!("Failed to create or access business root: {}", cfg.business_root.display()))?;
    let assets = StaticAssets::load(&cfg.static_root)?;
    info!(target: "startup", "preloaded {} static assets from {}", assets.len(), cfg.static_root.display());

    if let Some(types) = &cfg.types_file {
        let entries = manifest::load_manifest(types)?;
        let n = manifest::register_manifest(&mut registry, &entries);
        info!(target: "startup", "registered {}/{} types from {}", n, entries.len(), types.display());
    }
    info!(target: "startup", "business types: {:?}", registry.type_names());

    Ok(Engine::new(registry, assets, Arc::new(user), Arc::new(business), Arc::new(LuaSandbox::new(cfg.sandbox_limits()))))
}

/// Start the HTTP server with `registry` plus the configured type manifest.
pub async fn run_with_config(cfg: ServerConfig, registry: EntityRegistry) -> anyhow::Result<()> {
    log_startup_folders(&cfg);
    let engine = build_engine(&cfg, registry)?;
    let app = build_router(engine, cfg.log_requests);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
