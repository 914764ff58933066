use anyhow::Result;
use axum::Router;
use blob_helper::{
    BlobNavigator, LocalObjectStore, MimeRegistry, SearchPolicy,
    config::{AppConfig, Command},
    handlers::AppState,
    routes,
};
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting blob-helper with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    let store = LocalObjectStore::new(db, cfg.storage_dir.clone());
    store.migrate().await?;
    if command == Command::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }
    store.ensure_bucket(&cfg.bucket).await?;

    let navigator = BlobNavigator::new(
        cfg.bucket.clone(),
        Arc::new(store.clone()),
        Arc::new(MimeRegistry),
    )
    .with_storage_host(cfg.storage_host.clone());

    match command {
        Command::Today { prefix_root } => list_today(&navigator, &prefix_root).await,
        Command::Serve => serve(&cfg, AppState { navigator, store }).await,
        Command::Migrate => Ok(()),
    }
}

/// Print every blob under `{prefix_root}/{yyyyMMdd}/`.
async fn list_today(navigator: &BlobNavigator, prefix_root: &str) -> Result<()> {
    let prefix = format!("{}/{}/", prefix_root, Local::now().format("%Y%m%d"));
    let blobs = navigator.list_blobs(&prefix, SearchPolicy::All).await?;

    tracing::info!("{} blobs under {}", blobs.len(), prefix);
    for blob in &blobs {
        if blob.is_directory {
            println!("{}", blob.key);
        } else {
            println!("{}\t{}\t{}", blob.key, blob.size, navigator.download_url(blob));
        }
    }
    Ok(())
}

async fn serve(cfg: &AppConfig, state: AppState) -> Result<()> {
    let app: Router = routes::routes::routes().with_state(state);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Serving download URLs on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
