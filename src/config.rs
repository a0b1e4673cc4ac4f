use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEV_SIGNING_SECRET: &str = "media-store-dev-secret";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Origin used when building public and signed object URLs.
    pub public_base_url: String,
    pub signing_secret: String,
    /// Private bucket receiving video chunks.
    pub video_bucket: String,
    /// Public bucket receiving thumbnails.
    pub media_bucket: String,
    pub chunk_size: usize,
    /// Upper bound for per-request chunk sizes.
    pub max_chunk_size: usize,
    pub upload_concurrency: usize,
    /// Default signed URL lifetime in seconds.
    pub signed_url_expiry: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked video upload and streaming service")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides MEDIA_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public origin for object URLs (overrides MEDIA_STORE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Chunk size in bytes (overrides MEDIA_STORE_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Concurrent chunk uploads per video (overrides MEDIA_STORE_UPLOAD_CONCURRENCY)
    #[arg(long)]
    pub upload_concurrency: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Chunk-upload a local file, print the result as JSON and exit
    #[arg(long, value_name = "PATH")]
    pub upload_file: Option<PathBuf>,

    /// Content type recorded for --upload-file
    #[arg(long, default_value = "video/mp4")]
    pub content_type: String,
}

/// What `main` should do after configuration is loaded.
#[derive(Debug, Clone)]
pub enum Command {
    Serve,
    Migrate,
    UploadFile { path: PathBuf, content_type: String },
}

/// Read `MEDIA_STORE_{name}`, parse it, or fall back to `default`.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("MEDIA_STORE_{}", name);
    match env::var(&key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        Self::from_args(args)
    }

    pub fn from_args(args: Args) -> Result<(Self, Command)> {
        let signing_secret = match env::var("MEDIA_STORE_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("MEDIA_STORE_SIGNING_SECRET not set; using the development secret");
                DEV_SIGNING_SECRET.to_string()
            }
        };

        let port = env_or("PORT", 3000u16)?;
        let cfg = Self {
            host: args
                .host
                .map_or_else(|| env_or("HOST", "0.0.0.0".to_string()), Ok)?,
            port: args.port.unwrap_or(port),
            storage_dir: args
                .storage_dir
                .map_or_else(|| env_or("STORAGE_DIR", "./data/objects".to_string()), Ok)?,
            database_url: args.database_url.map_or_else(
                || env_or("DATABASE_URL", "sqlite://./data/meta/media_store.db".to_string()),
                Ok,
            )?,
            public_base_url: args.public_base_url.map_or_else(
                || env_or("PUBLIC_BASE_URL", format!("http://localhost:{}", port)),
                Ok,
            )?,
            signing_secret,
            video_bucket: env_or("VIDEO_BUCKET", "videos".to_string())?,
            media_bucket: env_or("MEDIA_BUCKET", "media".to_string())?,
            chunk_size: args
                .chunk_size
                .map_or_else(|| env_or("CHUNK_SIZE", 10 * 1024 * 1024), Ok)?,
            max_chunk_size: env_or("MAX_CHUNK_SIZE", 64 * 1024 * 1024)?,
            upload_concurrency: args
                .upload_concurrency
                .map_or_else(|| env_or("UPLOAD_CONCURRENCY", 4), Ok)?,
            signed_url_expiry: env_or("SIGNED_URL_EXPIRY", 86_400)?,
        };

        if cfg.chunk_size == 0 {
            anyhow::bail!("chunk size must be greater than zero");
        }
        if cfg.chunk_size > cfg.max_chunk_size {
            anyhow::bail!(
                "chunk size {} exceeds the maximum of {} bytes",
                cfg.chunk_size,
                cfg.max_chunk_size
            );
        }
        if cfg.upload_concurrency == 0 {
            anyhow::bail!("upload concurrency must be greater than zero");
        }

        let command = if args.migrate {
            Command::Migrate
        } else if let Some(path) = args.upload_file {
            Command::UploadFile {
                path,
                content_type: args.content_type,
            }
        } else {
            Command::Serve
        };

        Ok((cfg, command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
