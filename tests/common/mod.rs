#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use image::{DynamicImage, Rgb, RgbImage};
use loki::db::Database;
use loki::handlers::{create_app, AppState};
use loki::models::config::AppConfig;
use loki::services::attacks::AttackRegistry;
use loki::services::classifiers::{ClassifierRegistry, ImageClassifier, LinearClassifier};
use loki::services::datasets::{DatasetRegistry, LabelTable};
use loki::services::orchestrator::Orchestrator;
use loki::services::registry::Descriptor;
use loki::utils::imaging::{encode_base64, encode_image, prepare_storage, ImageExt};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    /// Static dir; removed on drop.
    pub dir: TempDir,
}

/// Router over an in-memory database and the three-class color model.
pub async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.static_dir = dir.path().to_path_buf();
    config.ml.epsilon = 0.3;
    prepare_storage(&config.storage).unwrap();

    let db = Database::in_memory().await.unwrap();
    let datasets = DatasetRegistry::load(Path::new("data/datasets/imagenet/imagenet_labels.json")).unwrap();

    let model: Arc<dyn ImageClassifier> = Arc::new(LinearClassifier::rgb(&candle_core::Device::Cpu).unwrap());
    let classifiers = ClassifierRegistry::from_models(
        vec![(Descriptor::new("RGB", "https://example.org/rgb"), model)],
        LabelTable::new(vec!["red".into(), "green".into(), "blue".into()]),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(classifiers),
        Arc::new(AttackRegistry::builtin()),
        config.ml.epsilon,
    );

    let state = AppState::new(config, db, orchestrator, datasets);
    TestApp {
        router: create_app(state.clone()),
        state,
        dir,
    }
}

pub fn solid_png(color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb(color)));
    encode_image(&image, ImageExt::Png).unwrap()
}

pub fn solid_base64(color: [u8; 3]) -> String {
    encode_base64(&solid_png(color))
}

pub fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn form(method: &str, uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form_encode(pairs)))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

/// `name=value` of a cookie set by the response.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{name}=")) && pair.len() > name.len() + 1)
        .map(str::to_string)
}

pub fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request.headers_mut().insert(header::COOKIE, cookie.parse().unwrap());
    request
}

pub fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

/// Log in through the form and return the session cookie.
pub async fn login(app: &TestApp, email: &str, password: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(form("POST", "/login", &[("email", email), ("password", password)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/home");
    set_cookie(&response, "session").expect("session cookie")
}
