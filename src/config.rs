use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub max_file_size_mb: u64,
    pub bootstrap_admin: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-user PDF document repository")]
pub struct Args {
    /// Host to bind to (overrides DATAROOM_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DATAROOM_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded documents are stored (overrides DATAROOM_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DATAROOM_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum upload size in megabytes (overrides DATAROOM_MAX_FILE_SIZE_MB)
    #[arg(long)]
    pub max_file_size_mb: Option<u64>,

    /// Email of an admin account to create at startup if missing
    /// (overrides DATAROOM_BOOTSTRAP_ADMIN)
    #[arg(long)]
    pub bootstrap_admin: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DATAROOM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env_or("DATAROOM_PORT", 5000u16)?;
        let env_storage = env::var("DATAROOM_STORAGE_DIR").unwrap_or_else(|_| "./storage".into());
        let env_db = env::var("DATAROOM_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/dataroom.db".into());
        let env_max_size = parse_env_or("DATAROOM_MAX_FILE_SIZE_MB", 100u64)?;
        let env_admin = env::var("DATAROOM_BOOTSTRAP_ADMIN").ok();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_file_size_mb: args.max_file_size_mb.unwrap_or(env_max_size),
            bootstrap_admin: args.bootstrap_admin.or(env_admin),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
