use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use minee::assets::StaticAssets;
use minee::engine::Engine;
use minee::registry::{BusinessEntity, EntityRegistry};
use minee::scripts::LuaSandbox;
use minee::server::build_router;
use minee::storage::FsTree;

struct Fixture {
    _tmp: tempfile::TempDir,
    user: std::path::PathBuf,
    business: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let user = tmp.path().join("user");
        let business = tmp.path().join("business");
        fs::create_dir_all(user.join("items")).unwrap();
        fs::create_dir_all(&business).unwrap();
        fs::write(user.join("items/type"), "widget").unwrap();
        fs::write(user.join("items/sequence.json"), r#"{"nextId":5}"#).unwrap();
        Self { _tmp: tmp, user, business }
    }

    fn router(&self) -> Router {
        let mut registry = EntityRegistry::new();
        registry.register(BusinessEntity::new("widget", "/widget")).unwrap();
        registry.register(
            BusinessEntity::new("folder", "/folder")
                .allow(["x/foo"])
                .on_before_create(|_, v| Ok((v, None))),
        ).unwrap();
        let assets = StaticAssets::from_entries([
            ("/index.html", "<h1>{{.PageTitle}}</h1>{{.JsonOutput}}"),
            ("/app.js", "console.log(1)"),
        ]);
        let engine = Engine::new(
            registry,
            assets,
            Arc::new(FsTree::new(&self.user).unwrap()),
            Arc::new(FsTree::new(&self.business).unwrap()),
            Arc::new(LuaSandbox::default()),
        );
        build_router(engine, false)
    }
}

fn read(path: &Path) -> String { fs::read_to_string(path).unwrap() }

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn write(method: &str, uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn post_allocates_from_sequence() {
    let fx = Fixture::new();
    let app = fx.router();
    let (status, headers, _) = send(&app, write("POST", "/items/", "application/widget", r#"{"a":1}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get("location").unwrap(), "/items/5/");
    assert_eq!(read(&fx.user.join("items/5/data.json")), r#"{"a":1}"#);
    assert_eq!(read(&fx.user.join("items/5/type")), "widget");
    assert_eq!(read(&fx.user.join("items/sequence.json")), r#"{"nextId":6}"#);
}

#[tokio::test]
async fn round_trip_get_returns_stored_bytes() {
    let fx = Fixture::new();
    let app = fx.router();
    let (_, headers, _) = send(&app, write("POST", "/items/", "application/widget", r#"{"b":[1,2],"a":"x"}"#)).await;
    let location = headers.get("location").unwrap().to_str().unwrap().to_string();
    let (status, headers, body) = send(&app, get(&format!("{}data.json", location))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(body, r#"{"b":[1,2],"a":"x"}"#);
}

#[tokio::test]
async fn listing_negotiation() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.user.join("c/5")).unwrap();
    fs::create_dir_all(fx.user.join("c/6")).unwrap();
    let app = fx.router();

    let (status, headers, body) = send(&app, get("/c/?json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(body, r#"["5/","6/"]"#);

    let (_, headers, body) = send(&app, get("/c/?module")).await;
    assert_eq!(headers.get("content-type").unwrap(), "application/javascript");
    assert_eq!(body, "'use strict';\nconst data=[\"5/\",\"6/\"]\nexport {data}");

    let (_, headers, body) = send(&app, get("/c/")).await;
    assert_eq!(headers.get("content-type").unwrap(), "text/html");
    assert_eq!(body, r#"<h1>/c/</h1>["5/","6/"]"#);

    let req = Request::builder().uri("/c/").header("accept", "application/json").body(Body::empty()).unwrap();
    let (_, _, body) = send(&app, req).await;
    assert_eq!(body, r#"["5/","6/"]"#);
}

#[tokio::test]
async fn directory_without_slash_redirects() {
    let fx = Fixture::new();
    let app = fx.router();
    let (status, headers, _) = send(&app, get("/items")).await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(headers.get("location").unwrap(), "/items/");
}

#[tokio::test]
async fn unsupported_subtype_is_415_without_mutation() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.user.join("box")).unwrap();
    fs::write(fx.user.join("box/type"), "folder").unwrap();
    let app = fx.router();
    let (status, _, _) = send(&app, write("POST", "/box/", "application/x.bogus", "{}")).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let names: Vec<String> = fs::read_dir(fx.user.join("box")).unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["type".to_string()]);
}

#[tokio::test]
async fn patch_without_script_keeps_data() {
    let fx = Fixture::new();
    let app = fx.router();
    send(&app, write("POST", "/items/", "application/widget", r#"{"a":1}"#)).await;
    let (status, _, _) = send(&app, write("PATCH", "/items/5/", "application/widget", r#"{"a":2}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(read(&fx.user.join("items/5/data.json")), r#"{"a":1}"#);
}

#[tokio::test]
async fn put_replaces_and_returns_204() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.business.join("widget")).unwrap();
    fs::write(fx.business.join("widget/compute.lua"), "function compute(d, o) d.was = o.a return d end").unwrap();
    let app = fx.router();
    send(&app, write("POST", "/items/", "application/widget", r#"{"a":1}"#)).await;
    let (status, _, _) = send(&app, write("PUT", "/items/5/", "application/widget", r#"{"a":2}"#)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let stored: serde_json::Value = serde_json::from_str(&read(&fx.user.join("items/5/data.json"))).unwrap();
    assert_eq!(stored, serde_json::json!({"a": 2, "was": 1}));
}

#[tokio::test]
async fn static_assets_and_read_only_writes() {
    let fx = Fixture::new();
    let app = fx.router();
    let (status, headers, body) = send(&app, get("/app.js")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "console.log(1)");
    assert_eq!(headers.get("content-type").unwrap(), "application/javascript");
    assert!(headers.get("cache-control").is_some());

    let (status, headers, _) = send(&app, write("POST", "/app.js", "application/widget", "{}")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers.get("allow").unwrap(), "GET");
}

#[tokio::test]
async fn traversal_and_unknown_paths() {
    let fx = Fixture::new();
    let app = fx.router();
    let (status, _, _) = send(&app, get("/items/%2E%2E/%2E%2E/etc/passwd")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(&app, get("/no/such/thing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn script_generated_ids_and_relocation() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.business.join("widget")).unwrap();
    fs::write(fx.business.join("widget/generateId.lua"), "function generateId(d) return d.slug end").unwrap();
    fs::create_dir_all(fx.business.join("items")).unwrap();
    fs::write(fx.business.join("items/beforePost.lua"), "function beforePost(d) locate('view/') return d end").unwrap();
    let app = fx.router();
    let (status, headers, _) = send(&app, write("POST", "/items/", "application/widget", r#"{"slug":"hello"}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get("location").unwrap(), "/items/hello/view/");
    assert!(fx.user.join("items/hello/data.json").exists());
    // hook scripts are not served
    let (status, _, _) = send(&app, get("/items/beforePost.lua")).await;
    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn post_through_path_aliases_shares_the_sequence() {
    let fx = Fixture::new();
    let app = fx.router();
    let mut locations = Vec::new();
    for uri in ["/items/", "/items//", "//items/"] {
        let (status, headers, _) = send(&app, write("POST", uri, "application/widget", "{}")).await;
        assert_eq!(status, StatusCode::CREATED);
        locations.push(headers.get("location").unwrap().to_str().unwrap().to_string());
    }
    assert_eq!(locations, vec!["/items/5/", "/items/6/", "/items/7/"]);
    assert_eq!(read(&fx.user.join("items/sequence.json")), r#"{"nextId":8}"#);
}

#[tokio::test]
async fn post_without_content_type_creates_untyped_instance() {
    let fx = Fixture::new();
    let app = fx.router();
    let req = Request::builder().method("POST").uri("/items/").body(Body::from(r#"{"a":1}"#)).unwrap();
    let (status, headers, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get("location").unwrap(), "/items/5/");
    assert_eq!(read(&fx.user.join("items/5/data.json")), r#"{"a":1}"#);
    assert!(!fx.user.join("items/5/type").exists());
}
