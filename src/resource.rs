//! Resource handles and how they serve a request.
//!
//! The resolver produces exactly one `Resource` per request. The set of kinds
//! is closed; each kind knows how to render itself on GET and how to answer
//! POST / PUT / PATCH (only user-tree directories accept writes, everything
//! else answers `405` with `Allow: GET`, redirects and statuses answer with
//! their own code).

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::engine::{Engine, EngineRequest};
use crate::error::AppError;
use crate::registry::{BusinessEntity, HookContext};
use crate::storage::paths;

pub const ALLOW_READ: &str = "GET";
pub const ALLOW_WRITE: &str = "GET, POST, PUT, PATCH";

/// Which tree a directory listing reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    User,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Directory without trailing separator: `301` for every method.
    Slash,
    /// Instance reachable under its type's context root: `301` on GET, `303` on writes.
    Canonical,
    /// Current version of a business asset: `303`.
    Version,
}

impl RedirectKind {
    pub fn status(self, write: bool) -> u16 {
        match self {
            RedirectKind::Slash => 301,
            RedirectKind::Canonical => if write { 303 } else { 301 },
            RedirectKind::Version => 303,
        }
    }
}

/// Directory listing representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Json,
    Module,
    Html,
}

impl Listing {
    /// `?json` / `?module` win; otherwise `Accept: application/json` selects JSON.
    pub fn negotiate(query: Option<&str>, accept: Option<&str>) -> Listing {
        if let Some(q) = query {
            for pair in q.split('&') {
                let key = pair.split('=').next().unwrap_or("");
                match key {
                    "json" => return Listing::Json,
                    "module" => return Listing::Module,
                    _ => {}
                }
            }
        }
        match accept {
            Some(a) if a.split(',').any(|m| m.split(';').next().unwrap_or("").trim() == "application/json") => Listing::Json,
            _ => Listing::Html,
        }
    }

    /// Listing selected by a trailing path segment (`/items/json`).
    pub fn from_segment(seg: &str) -> Option<Listing> {
        match seg {
            "json" => Some(Listing::Json),
            "module" => Some(Listing::Module),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resource {
    Static { data: Bytes },
    /// Landing page of a business type (its context root with trailing separator).
    Landing { entity: Arc<BusinessEntity>, path: String },
    /// A stored file whose parent directory names a registered type.
    Business { entity: Arc<BusinessEntity>, path: String, data: Bytes },
    Directory { root: Root, path: String, listing: Option<Listing> },
    Redirect { kind: RedirectKind, location: String },
    Status { code: u16, fault: Option<String> },
}

impl Resource {
    pub fn status(code: u16) -> Self { Resource::Status { code, fault: None } }

    pub fn fault(fault: impl Into<String>) -> Self { Resource::Status { code: 500, fault: Some(fault.into()) } }

    pub fn redirect(kind: RedirectKind, location: impl Into<String>) -> Self {
        Resource::Redirect { kind, location: location.into() }
    }

    fn allow(&self) -> &'static str {
        match self {
            Resource::Directory { root: Root::User, .. } | Resource::Redirect { .. } => ALLOW_WRITE,
            _ => ALLOW_READ,
        }
    }

    pub fn get(&self, engine: &Engine, negotiated: Listing) -> Reply {
        match self {
            Resource::Static { data } => Reply::new(200).body(data.clone()),
            Resource::Landing { entity, path } => render_index(engine, &entity.name, path, "null"),
            Resource::Business { entity, path, data } => render_business(entity, path, data),
            Resource::Directory { root, path, listing } => render_directory(engine, *root, path, listing.unwrap_or(negotiated)),
            Resource::Redirect { kind, location } => Reply::new(kind.status(false)).header("location", location.clone()),
            Resource::Status { code, fault } => Reply::status_with_fault(*code, fault.as_deref()),
        }
    }

    pub fn post(&self, engine: &Engine, req: &EngineRequest) -> Reply {
        self.write(req, |path| {
            engine.create(path, req.content_type.as_deref(), &req.body)
                .map(|location| Reply::new(201).header("location", location))
        })
    }

    pub fn put(&self, engine: &Engine, req: &EngineRequest) -> Reply {
        self.write(req, |path| engine.replace(path, req.content_type.as_deref(), &req.body).map(|()| Reply::new(204)))
    }

    pub fn patch(&self, engine: &Engine, req: &EngineRequest) -> Reply {
        self.write(req, |path| engine.patch(path, req.content_type.as_deref(), &req.body).map(|()| Reply::new(201)))
    }

    /// Method outside GET/POST/PUT/PATCH.
    pub fn unsupported(&self) -> Reply {
        match self {
            Resource::Status { code, fault } => Reply::status_with_fault(*code, fault.as_deref()),
            _ => Reply::from_error(&AppError::method_not_allowed(self.allow())),
        }
    }

    fn write<F>(&self, req: &EngineRequest, op: F) -> Reply
    where
        F: FnOnce(&str) -> Result<Reply, AppError>,
    {
        match self {
            Resource::Directory { root: Root::User, path, listing: None } => match op(path) {
                Ok(reply) => reply,
                Err(e) => {
                    if e.http_status() >= 500 {
                        error!(target: "minee::pipeline", "{} {} failed: {}", req.method, path, e);
                    } else {
                        debug!(target: "minee::pipeline", "{} {} rejected: {}", req.method, path, e);
                    }
                    Reply::from_error(&e)
                }
            },
            Resource::Redirect { kind, location } => Reply::new(kind.status(true)).header("location", location.clone()),
            Resource::Status { code, fault } => Reply::status_with_fault(*code, fault.as_deref()),
            _ => Reply::from_error(&AppError::method_not_allowed(ALLOW_READ)),
        }
    }
}

fn render_business(entity: &BusinessEntity, path: &str, data: &Bytes) -> Reply {
    let Some(filter) = &entity.hooks.filter else {
        return Reply::new(200).body(data.clone());
    };
    let ctx = HookContext {
        id: paths::base_name(&paths::parent_dir(path)),
        business_type: entity.type_name.clone(),
        collection: paths::as_dir(&paths::parent_dir(&paths::parent_dir(path))),
        target: paths::as_dir(&paths::parent_dir(path)),
    };
    let filtered = entity.unmarshal(data)
        .and_then(|v| filter(&ctx, v))
        .and_then(|v| entity.marshal(&v));
    match filtered {
        Ok(bytes) => Reply::new(200).body(bytes),
        Err(e) => {
            error!(target: "minee::resolver", "filter for {} failed: {:#}", path, e);
            Reply::from_error(&AppError::codec(format!("{:#}", e)))
        }
    }
}

fn render_directory(engine: &Engine, root: Root, path: &str, listing: Listing) -> Reply {
    let tree = match root {
        Root::User => engine.user_tree(),
        Root::Business => engine.business_tree(),
    };
    let children = match tree.list_children(path) {
        Ok(c) => c,
        Err(e) => {
            error!(target: "minee::resolver", "cannot list {}: {}", path, e);
            return Reply::from_error(&AppError::persistence(e.to_string()));
        }
    };
    // temp files of in-flight writes and other dot files stay hidden
    let names: Vec<String> = children.into_iter()
        .filter(|c| !c.name.starts_with('.'))
        .map(|c| if c.is_dir { format!("{}/", c.name) } else { c.name })
        .collect();
    let json = match serde_json::to_string(&names) {
        Ok(j) => j,
        Err(e) => return Reply::from_error(&AppError::internal(e.to_string())),
    };
    match listing {
        Listing::Json => Reply::new(200).header("content-type", "application/json").body(json),
        Listing::Module => Reply::new(200)
            .header("content-type", "application/javascript")
            .body(format!("'use strict';\nconst data={}\nexport {{data}}", json)),
        Listing::Html => render_index(engine, path, path, &json),
    }
}

fn render_index(engine: &Engine, title: &str, path: &str, json: &str) -> Reply {
    let Some(template) = engine.assets().index_page() else {
        error!(target: "minee::resolver", "index page is not among the static assets");
        return Reply::from_error(&AppError::internal("index page is not available"));
    };
    let page = String::from_utf8_lossy(&template)
        .replace("{{.PageTitle}}", title)
        .replace("{{.PathToRoot}}", &path_to_root(path))
        .replace("{{.JsonOutput}}", json);
    Reply::new(200).header("content-type", "text/html").body(page)
}

/// Relative prefix leading from a directory path back to `/`.
pub fn path_to_root(path: &str) -> String {
    "../".repeat(path.split('/').filter(|s| !s.is_empty()).count())
}

/// Transport-independent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl Reply {
    pub fn new(status: u16) -> Self { Self { status, headers: Vec::new(), body: Bytes::new() } }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self { self.body = body.into(); self }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    fn status_with_fault(code: u16, fault: Option<&str>) -> Self {
        let reply = Reply::new(code);
        match fault {
            Some(f) => reply.header("error", sanitize_header(f)),
            None => reply,
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        let mut reply = Reply::new(err.http_status());
        if let AppError::MethodNotAllowed { allow } = err {
            reply = reply.header("allow", *allow);
        }
        if let Some(fault) = err.fault_header() {
            reply = reply.header("error", sanitize_header(&fault));
        }
        reply
    }
}

fn sanitize_header(text: &str) -> String {
    text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = (status, Body::from(self.body)).into_response();
        for (name, value) in self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(n), Ok(v)) => { resp.headers_mut().insert(n, v); }
                _ => debug!(target: "minee::http", "dropping unrepresentable header {}", name),
            }
        }
        resp
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod resource_tests;
