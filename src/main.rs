use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenant_storage::{
    api,
    blob_store::{BlobStore, GcsStore, LocalStore},
    config::{Config, StorageBackend},
    gateway::ObjectGateway,
    notify::{FileNotifier, HttpNotifier, NoopNotifier},
    storage::Database,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tenant-storage starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.server.data_dir)?;
    info!("Database opened at: {}", config.server.data_dir);

    // Initialize blob store backend
    let container = &config.storage.container;
    let store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => {
            let store = LocalStore::new(&config.storage.local_storage_path, container)?;
            info!(
                container = %container,
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            Arc::new(store)
        }
        StorageBackend::Gcs => {
            let store = GcsStore::new(
                container,
                config.storage.gcs_credentials_file.as_deref(),
                config.storage.gcs_project.as_deref(),
            )
            .await?;
            info!("Using GCS storage backend, bucket: {}", container);
            Arc::new(store)
        }
    };

    let gateway = ObjectGateway::new(store, config.storage.upload_guard);
    info!(guard = ?gateway.guard(), "Object gateway ready");

    let notifier: Arc<dyn FileNotifier> = match config.notify_base_url.as_deref() {
        Some(base_url) => {
            info!("Sending file notifications to: {}", base_url);
            Arc::new(HttpNotifier::new(base_url)?)
        }
        None => Arc::new(NoopNotifier),
    };

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        associations: Arc::new(db.clone()),
        db,
        gateway,
        notifier,
    });

    // Build and start the HTTP server
    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
