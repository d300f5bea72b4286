//! HTTP surface tests against the router with stub models.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{prelude::BASE64_STANDARD, Engine};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use serde_json::{json, Value};
use stipple_core::{GenerationRequest, ModelLike, ModelProvider, SharedModel};
use stipple_server::{router, AppState};
use tower::ServiceExt; // for `oneshot`

/// Returns a solid image of the requested size; fails once `fail_after`
/// images have been produced.
struct Stub {
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl Stub {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_after: None })
    }

    fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_after: Some(n) })
    }
}

impl ModelLike for Stub {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after == Some(call) {
            anyhow::bail!("CUDA out of memory");
        }
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            request.width as u32,
            request.height as u32,
            Rgb([200, 100, 50]),
        )))
    }
}

fn app(model: Arc<Stub>) -> axum::Router {
    router(AppState(Arc::new(ModelProvider::ready(model))))
}

async fn post_json(app: axum::Router, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri("/txt2img")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn ping_returns_pong() {
    let response = app(Stub::new())
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"pong");
}

#[tokio::test]
async fn returns_one_png_per_requested_image() {
    let model = Stub::new();
    let body = json!({
        "num_inference_steps": 20,
        "prompt": "A vector-style design an apple, enclosed within a circular border (white background)",
        "batch_size": 5,
        "width": 64,
        "height": 32
    });
    let (status, json) = post_json(app(model.clone()), body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    let images = json["images"].as_array().unwrap();
    assert_eq!(images.len(), 5);
    assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    for image in images {
        let bytes = BASE64_STANDARD.decode(image.as_str().unwrap()).unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }
}

#[tokio::test]
async fn defaults_apply_when_fields_are_omitted() {
    let (status, json) = post_json(app(Stub::new()), json!({"prompt": "a cat"}).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    let images = json["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    let bytes = BASE64_STANDARD.decode(images[0].as_str().unwrap()).unwrap();
    assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (512, 512));
}

#[tokio::test]
async fn repeated_single_image_requests_each_return_one_image() {
    let model = Stub::new();
    let app = app(model.clone());
    let body = json!({"prompt": "a bear raising a cup, LogoRedmondV2", "num_inference_steps": 10, "batch_size": 1, "width": 8, "height": 8});

    for _ in 0..2 {
        let (status, json) = post_json(app.clone(), body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["images"].as_array().unwrap().len(), 1);
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_batch_returns_empty_list() {
    let (status, json) =
        post_json(app(Stub::new()), json!({"prompt": "x", "batch_size": 0}).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"images": []}));
}

#[tokio::test]
async fn missing_prompt_is_a_validation_error() {
    let model = Stub::new();
    let (status, json) = post_json(app(model.clone()), json!({"batch_size": 1}).to_string()).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().contains("prompt"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    for body in [
        json!({"prompt": 42}).to_string(),
        json!({"prompt": "x", "batch_size": -1}).to_string(),
        "{not json".to_string(),
    ] {
        let (status, json) = post_json(app(Stub::new()), body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["detail"].is_string());
    }
}

#[tokio::test]
async fn generation_failure_is_500_without_partial_images() {
    let (status, json) = post_json(
        app(Stub::failing_after(2)),
        json!({"prompt": "x", "batch_size": 4, "width": 8, "height": 8}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["detail"].as_str().unwrap().contains("CUDA out of memory"));
    assert!(json.get("images").is_none());
}

#[tokio::test]
async fn lazy_model_is_built_once_across_requests() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let provider = ModelProvider::lazy(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, anyhow::Error>(Stub::new() as SharedModel) }
    });
    let app = router(AppState(Arc::new(provider)));

    for _ in 0..3 {
        let (status, _) = post_json(
            app.clone(),
            json!({"prompt": "x", "width": 8, "height": 8}).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lazy_model_failure_is_500() {
    let provider = ModelProvider::lazy(|| async {
        Err::<SharedModel, _>(anyhow::anyhow!("401 Unauthorized: gated repo"))
    });
    let app = router(AppState(Arc::new(provider)));

    let (status, json) = post_json(app, json!({"prompt": "x"}).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["detail"].as_str().unwrap().contains("gated repo"));
}
