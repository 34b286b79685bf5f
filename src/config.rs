use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf};

/// Which storage backend implementation to use.
///
/// Two historical variants exist: a remote object gateway reached over
/// HTTP, and a plain local filesystem rooted at a configurable directory.
/// Both satisfy the same `StorageBackend` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVariant {
    Filesystem,
    Http,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Local mountpoint shared with the workers; batches, production
    /// files and orders are staged beneath it.
    pub staging_root: PathBuf,
    pub database_url: String,
    /// PID cache location. When unset an in-process map is used instead.
    pub redis_url: Option<String>,
    pub storage_variant: StorageVariant,
    /// Root directory of the filesystem backend variant.
    pub storage_root: PathBuf,
    /// Base URL of the HTTP object-gateway backend variant.
    pub gateway_url: Option<String>,
    /// Collection names inside the storage backend.
    pub batches_coll: String,
    pub orders_coll: String,
    pub production_coll: String,
    /// Prefix prepended to generated PIDs; identifies this instance.
    pub uid_prefix: String,
    /// External import-manager notification endpoint.
    pub notify_url: Option<String>,
    pub edmo_code: Option<i64>,
    pub api_version: Option<String>,
    /// File holding the 32-byte secret used to seal download tokens.
    pub secret_path: PathBuf,
    /// Orders larger than this many bytes are split into numbered parts.
    pub max_zip_size: u64,
    /// Path of the external archive-splitting utility.
    pub zipsplit_bin: PathBuf,
    /// Outside production mode outbound notifications are only logged.
    pub production: bool,
    /// When set, deletion tasks also evict cache and record entries for
    /// paths under the removed tree.
    pub evict_on_delete: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Batch/order lifecycle API")]
pub struct Args {
    /// Host to bind to (overrides DATA_LIFECYCLE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DATA_LIFECYCLE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Staging mountpoint (overrides DATA_LIFECYCLE_STAGING_ROOT)
    #[arg(long)]
    pub staging_root: Option<PathBuf>,

    /// Database URL (overrides DATA_LIFECYCLE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend variant: "fs" or "http"
    #[arg(long)]
    pub storage: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

const DEFAULT_MAX_ZIP_SIZE: u64 = 2_147_483_648; // 2 GiB

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::from_env(args)
    }

    fn from_env(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("DATA_LIFECYCLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("DATA_LIFECYCLE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DATA_LIFECYCLE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading DATA_LIFECYCLE_PORT"),
        };
        let env_staging = env::var("DATA_LIFECYCLE_STAGING_ROOT")
            .unwrap_or_else(|_| "./data/staging".into());
        let env_db = env::var("DATA_LIFECYCLE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/data_lifecycle.db".into());

        let variant = args
            .storage
            .or_else(|| env::var("DATA_LIFECYCLE_STORAGE").ok())
            .unwrap_or_else(|| "fs".into());
        let storage_variant = match variant.to_ascii_lowercase().as_str() {
            "fs" | "filesystem" => StorageVariant::Filesystem,
            "http" | "gateway" => StorageVariant::Http,
            other => bail!("unknown storage variant `{}` (expected fs or http)", other),
        };

        let max_zip_size = match env::var("DATA_LIFECYCLE_MAX_ZIP_SIZE") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing DATA_LIFECYCLE_MAX_ZIP_SIZE `{}`", value))?,
            Err(_) => DEFAULT_MAX_ZIP_SIZE,
        };

        let edmo_code = match env::var("DATA_LIFECYCLE_EDMO_CODE") {
            Ok(value) => Some(
                value
                    .parse::<i64>()
                    .with_context(|| format!("parsing DATA_LIFECYCLE_EDMO_CODE `{}`", value))?,
            ),
            Err(_) => None,
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_root: args.staging_root.unwrap_or_else(|| env_staging.into()),
            database_url: args.database_url.unwrap_or(env_db),
            redis_url: env::var("DATA_LIFECYCLE_REDIS_URL").ok(),
            storage_variant,
            storage_root: env::var("DATA_LIFECYCLE_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| "./data/store".into()),
            gateway_url: env::var("DATA_LIFECYCLE_GATEWAY_URL").ok(),
            batches_coll: env::var("DATA_LIFECYCLE_BATCHES_COLL")
                .unwrap_or_else(|_| "batches".into()),
            orders_coll: env::var("DATA_LIFECYCLE_ORDERS_COLL").unwrap_or_else(|_| "orders".into()),
            production_coll: env::var("DATA_LIFECYCLE_PRODUCTION_COLL")
                .unwrap_or_else(|_| "cloud".into()),
            uid_prefix: env::var("DATA_LIFECYCLE_UID_PREFIX")
                .unwrap_or_else(|_| "21.L00000".into()),
            notify_url: env::var("DATA_LIFECYCLE_NOTIFY_URL").ok(),
            edmo_code,
            api_version: env::var("DATA_LIFECYCLE_API_VERSION").ok(),
            secret_path: env::var("DATA_LIFECYCLE_SECRET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| "./data/meta/order_secrets.key".into()),
            max_zip_size,
            zipsplit_bin: env::var("DATA_LIFECYCLE_ZIPSPLIT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| "/usr/bin/zipsplit".into()),
            production: env::var("DATA_LIFECYCLE_PRODUCTION")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            evict_on_delete: env::var("DATA_LIFECYCLE_EVICT_ON_DELETE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // All batch/order locations are derived from {collection root, id};
    // no free-form path is ever persisted.

    /// Storage-backend collection of a batch.
    pub fn batch_collection(&self, batch_id: &str) -> String {
        format!("{}/{}", self.batches_coll, batch_id)
    }

    /// Local staging directory of a batch.
    pub fn batch_staging(&self, batch_id: &str) -> PathBuf {
        self.staging_root.join(&self.batches_coll).join(batch_id)
    }

    /// Storage-backend collection of an order.
    pub fn order_collection(&self, order_id: &str) -> String {
        format!("{}/{}", self.orders_coll, order_id)
    }

    /// Local scratch directory of an order.
    pub fn order_local(&self, order_id: &str) -> PathBuf {
        self.staging_root.join(&self.orders_coll).join(order_id)
    }

    /// Storage-backend path of a promoted production file.
    pub fn production_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.production_coll, file_name)
    }
}
