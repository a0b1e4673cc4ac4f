use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, Command};
use services::{
    disk_storage::DiskObjectStorage, metadata_store::SqliteMetadataStore,
    uploader::UploaderSettings, url_signer::UrlSigner,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        video_bucket = %cfg.video_bucket,
        media_bucket = %cfg.media_bucket,
        chunk_size = cfg.chunk_size,
        "Starting media-store"
    );

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, 5).await?);

    // --- Apply schema (idempotent) ---
    db::run_migrations(&db).await?;
    if matches!(command, Command::Migrate) {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize storage + metadata backends ---
    let disk = Arc::new(DiskObjectStorage::new(
        db.clone(),
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
        UrlSigner::new(&cfg.signing_secret),
    ));
    disk.ensure_bucket(&cfg.video_bucket, false).await?;
    disk.ensure_bucket(&cfg.media_bucket, true).await?;

    let state = AppState::new(
        disk.clone(),
        Arc::new(SqliteMetadataStore::new(db.clone())),
        UploaderSettings {
            bucket: cfg.video_bucket.clone(),
            chunk_size: cfg.chunk_size,
            max_chunk_size: cfg.max_chunk_size,
            concurrency: cfg.upload_concurrency,
        },
        &cfg.media_bucket,
        cfg.signed_url_expiry,
    )
    .with_disk(disk);

    if let Command::UploadFile { path, content_type } = &command {
        let video = state.uploader.upload_file(path, content_type).await?;
        println!("{}", serde_json::to_string_pretty(&video)?);
        return Ok(());
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
