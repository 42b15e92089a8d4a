//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode},
    routing::get as route_get,
};
use bytes::Bytes;
use segmask_server::codec::{self, MaskBitmap};
use segmask_server::store::ImageRecord;
use segmask_server::{
    AppState, Config, CoreError, CoreResult, MaskBackend, MaskStore, MemoryBackend, RawMask,
    SegmentationClient, api_routes,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower::util::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a test application over an in-memory store
pub fn create_test_app_with_state(
    client: Option<Arc<dyn SegmentationClient>>,
) -> (Router, AppState) {
    create_test_app_with_store(Arc::new(MaskStore::in_memory()), client)
}

/// Create a test application over a caller-supplied store
pub fn create_test_app_with_store(
    store: Arc<MaskStore>,
    client: Option<Arc<dyn SegmentationClient>>,
) -> (Router, AppState) {
    let mut config = Config::default();
    config.max_upload_size = 2 * 1024 * 1024;
    config.segmentation.timeout = Duration::from_secs(2);

    let app_state = AppState::new(store, client, &config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", route_get(health))
        .nest("/api", api_routes(app_state.clone()))
        .layer(cors);

    (app, app_state)
}

/// Create a test application router without a segmentation service
pub fn create_test_app() -> Router {
    create_test_app_with_state(None).0
}

/// Encode a solid RGB PNG of the given size
pub fn png_image(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Base64 single-channel PNG of a bitmap built from `f`
pub fn mask_b64(width: u32, height: u32, f: impl FnMut(u32, u32) -> bool) -> String {
    let bitmap = MaskBitmap::from_fn(width, height, f);
    codec::encode_base64(&codec::encode_mask_png(&bitmap).unwrap())
}

/// Send a request and decode the JSON response body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub fn get(uri: impl AsRef<str>) -> Request<Body> {
    Request::builder()
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: impl AsRef<str>) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: impl AsRef<str>, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri.as_ref())
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Upload a PNG of the given size and return its image id
pub async fn upload_image(app: &Router, width: u32, height: u32) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/api/images")
        .header("Content-Type", "image/png")
        .body(Body::from(png_image(width, height)))
        .unwrap();
    let (status, json) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["image_id"].as_str().unwrap().to_string()
}

/// Upload the two-mask 4x4 fixture: mask 1 top-left 2x2, mask 2 bottom-right 2x2
pub async fn upload_disjoint_fixture(app: &Router) -> String {
    let id = upload_image(app, 4, 4).await;
    let body = serde_json::json!({
        "masks": [
            { "mask_b64": mask_b64(4, 4, |x, y| x < 2 && y < 2) },
            { "mask_b64": mask_b64(4, 4, |x, y| x >= 2 && y >= 2), "score": 0.8 },
        ]
    });
    let (status, json) = send(app, json_request("PUT", format!("/api/images/{id}/masks"), body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    id
}

/// Segmentation client with canned behavior
pub struct MockSegmentationClient {
    pub masks: usize,
    pub fail: bool,
    pub delay: Duration,
}

#[async_trait]
impl SegmentationClient for MockSegmentationClient {
    async fn segment(&self, image_bytes: Bytes) -> CoreResult<Vec<RawMask>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(CoreError::ServiceUnavailable("mock outage".into()));
        }
        let img = image::load_from_memory(&image_bytes).unwrap();
        Ok((0..self.masks)
            .map(|i| {
                RawMask::new(MaskBitmap::from_fn(img.width(), img.height(), |x, _| {
                    x as usize % self.masks == i
                }))
            })
            .collect())
    }
}

/// In-memory backend whose removals can be switched to fail
#[derive(Default)]
pub struct FailingRemoveBackend {
    inner: MemoryBackend,
    pub fail_removes: AtomicBool,
}

impl FailingRemoveBackend {
    pub fn set_failing(&self, failing: bool) {
        self.fail_removes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MaskBackend for FailingRemoveBackend {
    async fn load_all(&self) -> CoreResult<Vec<ImageRecord>> {
        self.inner.load_all().await
    }

    async fn save(&self, record: &ImageRecord) -> CoreResult<()> {
        self.inner.save(record).await
    }

    async fn remove(&self, image_id: &str) -> CoreResult<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(CoreError::Storage("disk unavailable".into()));
        }
        self.inner.remove(image_id).await
    }

    fn name(&self) -> &'static str {
        "failing-remove"
    }
}
