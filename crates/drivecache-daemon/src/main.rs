//! drivecache daemon - background cache service
//!
//! Handles:
//! - Opening the file cache and the resource metadata store
//! - Resuming fetches and uploads left over from the previous run
//! - Loading the remote tree and polling it for changes
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Configuration is folded from defaults, the YAML file, `DRIVECACHE_*`
//! environment variables and command-line flags. The main loop calls
//! `check_for_updates` on every tick of the poll interval and is stopped by
//! a `CancellationToken` triggered by the signal handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use drivecache_cache::{DatabasePool, FileCache, ResourceMetadata, Schema, StatvfsDiskSpaceGetter};
use drivecache_core::config::{Config, ConfigLayer, ConfigLayers, ResolvedConfig};
use drivecache_core::ports::IDriveService;
use drivecache_core::util::grand_root_path;
use drivecache_remote::DriveApiClient;
use drivecache_sync::FileSystem;

/// Environment variable holding the OAuth access token
const ACCESS_TOKEN_ENV: &str = "DRIVECACHE_ACCESS_TOKEN";

#[derive(Debug, Parser)]
#[command(name = "drivecached", version, about = "Local cache for a remote drive")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `cache.root`
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Override `logging.level`
    #[arg(long)]
    log_level: Option<String>,

    /// OAuth access token for the remote API
    #[arg(long, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    access_token: String,
}

impl Cli {
    /// Folds defaults, file, environment and flags into the effective config
    fn resolve_config<I>(&self, env: I) -> Result<ResolvedConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config_path = self.config.clone().unwrap_or_else(Config::default_path);

        let mut layers = ConfigLayers::new();
        if config_path.exists() {
            layers = layers
                .with_file(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
        } else if self.config.is_some() {
            anyhow::bail!("Config file {} does not exist", config_path.display());
        }

        // The token is a secret, not a config key.
        layers = layers.with_env(env.into_iter().filter(|(name, _)| name != ACCESS_TOKEN_ENV));

        if let Some(dir) = &self.cache_dir {
            layers = layers.with_override(
                ConfigLayer::CommandLine,
                "cache.root",
                dir.display().to_string(),
            );
        }
        if let Some(level) = &self.log_level {
            layers = layers.with_override(ConfigLayer::CommandLine, "logging.level", level.as_str());
        }

        let resolved = layers.resolve()?;
        let errors = resolved.config.validate();
        if !errors.is_empty() {
            let list = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            anyhow::bail!("Invalid configuration: {list}");
        }
        Ok(resolved)
    }
}

fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the filesystem facade and the shutdown token
struct DaemonService {
    config: Config,
    fs: FileSystem,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens both stores under `cache.root` and wires the facade
    async fn new(config: Config, access_token: &str, shutdown: CancellationToken) -> Result<Self> {
        let root = config.cache.root.clone();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let cache = FileCache::open(
            root.clone(),
            Arc::new(StatvfsDiskSpaceGetter),
            config.min_free_space_bytes(),
        )
        .await
        .context("Failed to open file cache")?;
        cache.initialize().await.context("Failed to initialize file cache")?;

        let db_path = root.join("meta").join("resource_metadata.db");
        let db_pool = DatabasePool::new(&db_path, Schema::ResourceMetadata)
            .await
            .context("Failed to open metadata database")?;
        let metadata = Arc::new(ResourceMetadata::new(db_pool.pool().clone()));
        metadata
            .initialize()
            .await
            .context("Failed to initialize metadata")?;

        let service: Arc<dyn IDriveService> = Arc::new(DriveApiClient::with_base_url(
            access_token,
            &config.remote.base_url,
            &config.remote.upload_url,
        ));

        let fs = FileSystem::new(metadata, cache, service, &config.sync)
            .await
            .context("Failed to start sync client")?;

        info!(cache_root = %root.display(), "Stores opened");
        Ok(Self {
            config,
            fs,
            shutdown,
        })
    }

    /// Resumes leftover work, loads the tree, then polls until shutdown
    async fn run(&self) -> Result<()> {
        let sync_client = self.fs.sync_client();
        sync_client
            .start_processing_backlog()
            .await
            .context("Failed to scan cache backlog")?;

        // Triggers the initial load on an empty store.
        match self.fs.read_directory_by_path(&grand_root_path()).await {
            Ok(entries) => info!(entries = entries.len(), "Initial load complete"),
            Err(e) => warn!(error = %e, "Initial load failed, will retry on next poll"),
        }
        if let Err(e) = sync_client.start_checking_existing_pinned_files().await {
            warn!(error = %e, "Could not check pinned files");
        }

        let result = self.poll_loop().await;

        sync_client.cancel_all();
        result
    }

    async fn poll_loop(&self) -> Result<()> {
        let poll_interval = self.config.poll_interval();
        info!(poll_interval_secs = poll_interval.as_secs(), "Starting poll loop");

        let mut interval = tokio::time::interval(poll_interval);
        // The first tick fires immediately; the initial load just ran.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            debug!("Checking for remote updates");
            match self.fs.check_for_updates().await {
                Ok(()) => {
                    if let Err(e) = self.fs.sync_client().start_checking_existing_pinned_files().await {
                        warn!(error = %e, "Could not check pinned files");
                    }
                }
                Err(e) => warn!(error = %e, code = e.code(), "Update check failed"),
            }
            if let Err(e) = self.fs.retry_pending_uploads().await {
                warn!(error = %e, "Could not schedule pending uploads");
            }
        }

        info!("Poll loop terminated");
        Ok(())
    }
}

// ============================================================================
// Shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let resolved = cli.resolve_config(std::env::vars())?;
    init_tracing(&resolved.config);

    info!("drivecache daemon starting (drivecached)");
    for (key, layer) in &resolved.provenance {
        if *layer != ConfigLayer::Default {
            info!(key = %key, source = %layer, "Config override");
        }
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(resolved.config, &cli.access_token, shutdown_token).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("drivecache daemon shut down gracefully"),
        Err(e) => error!(error = %e, "drivecache daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
