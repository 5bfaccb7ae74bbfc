pub mod admin;
pub mod api;
pub mod forms;
pub mod pages;
pub mod session;

use crate::db::Database;
use crate::error::AppResult;
use crate::models::config::AppConfig;
use crate::services::auth::AuthService;
use crate::services::datasets::DatasetRegistry;
use crate::services::orchestrator::Orchestrator;
use crate::services::reports::ReportService;
use crate::services::storage::StorageService;
use crate::services::users::UserService;
use askama::Template;
use axum::extract::DefaultBodyLimit;
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::{compression::CompressionLayer, services::ServeDir, trace::TraceLayer};

/// Uploaded models and report image batches can be large.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

// State
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub users: UserService,
    pub reports: ReportService,
    pub storage: StorageService,
    pub auth: Arc<AuthService>,
    pub orchestrator: Arc<Orchestrator>,
    pub datasets: Arc<DatasetRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, orchestrator: Orchestrator, datasets: DatasetRegistry) -> Self {
        let auth = AuthService::new(db.users(), config.security.clone());
        Self {
            users: UserService::new(db.users()),
            reports: ReportService::new(db.reports()),
            storage: StorageService::new(db.clone(), config.storage.clone()),
            auth: Arc::new(auth),
            orchestrator: Arc::new(orchestrator),
            datasets: Arc::new(datasets),
            config: Arc::new(config),
            db,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let static_dir = state.config.storage.static_dir.clone();

    Router::new()
        .merge(pages::router())
        .merge(admin::router())
        .nest("/api/1", api::router())
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CookieManagerLayer::new())
        .with_state(state)
}

/// Inference and attacks are CPU-bound; keep them off the reactor.
pub(crate) async fn blocking<T, F>(work: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

pub(crate) fn render<T: Template>(template: T) -> Response {
    Html(template.render().unwrap_or_else(|_| "Template error".to_string())).into_response()
}
