use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use loki::db::Database;
use loki::handlers::{create_app, AppState};
use loki::models::config::AppConfig;
use loki::services::attacks::AttackRegistry;
use loki::services::classifiers::{select_device, ClassifierRegistry};
use loki::services::datasets::DatasetRegistry;
use loki::services::orchestrator::Orchestrator;
use loki::services::users::UserService;
use loki::utils::imaging::prepare_storage;
use loki::utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes first: it says where to log
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    let _log_guard = init_logging(&config.logging)?;
    if let Some(e) = config_error {
        warn!(error = %e, "Configuration could not be loaded, using defaults");
    }

    info!("Starting Loki v{}", env!("CARGO_PKG_VERSION"));

    prepare_storage(&config.storage)?;
    let db = Database::connect(&config.database.url, config.database.max_connections).await?;
    UserService::new(db.users())
        .promote_admins(&config.security.admin_emails)
        .await?;

    let device = select_device(&config.ml.device)?;
    let datasets = DatasetRegistry::load(&config.ml.imagenet_labels)?;
    let labels = datasets.imagenet()?.labels.clone();
    let classifiers = ClassifierRegistry::pretrained(config.ml.weights_dir.clone(), device, labels);
    let attacks = AttackRegistry::builtin();
    info!(
        classifiers = classifiers.len(),
        attacks = attacks.len(),
        weights = %config.ml.weights_dir.display(),
        "Registries ready"
    );
    let orchestrator = Orchestrator::new(Arc::new(classifiers), Arc::new(attacks), config.ml.epsilon);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_app(AppState::new(config, db, orchestrator, datasets));

    info!("Web server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
