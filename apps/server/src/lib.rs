//! # StoRM-Tape Server
//!
//! The Axum HTTP surface over the request lifecycle engine: bootstraps
//! configuration, the SQLite-backed request store, and the filesystem
//! probe, then serves the REST API until a shutdown signal arrives.
//!
//! ## Example
//! ```no_run
//! use storm_tape_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Server::builder()
//!         .config_path("storm-tape.conf")
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

mod handlers;
mod router;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::Handle;
use storm_tape_database::SqliteRequestStore;
use storm_tape_kernel::config::load_and_validate;
use storm_tape_kernel::{Configuration, PathResolver};
use storm_tape_stage::{RecallHandoff, RequestApi};
use storm_tape_storage::{LocalStorage, Probe};
use tokio::signal;
use tracing::{error, info};

const DEFAULT_DATABASE_FILE_NAME: &str = "storm-tape.sqlite";
const SHUTDOWN_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(30);

/// Shared, cheaply-cloneable application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<RequestApi>,
    pub recall: Arc<RecallHandoff>,
    pub config: Arc<Configuration>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// A fluent builder for configuring and initializing the [`Server`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config_path: PathBuf,
    config: Option<Configuration>,
}

impl ServerBuilder {
    /// Sets the path to the YAML configuration file.
    ///
    /// Still consulted for [`Self::resolve_database_path`] even when
    /// [`Self::config`] supplies an already-loaded [`Configuration`].
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Supplies an already-loaded, already-validated configuration, skipping
    /// the reload that [`Self::build`] would otherwise perform.
    ///
    /// Callers that need the configuration's `log_level`/`telemetry` before
    /// the rest of the server starts (to initialize the logger) should load
    /// it once and hand it in here.
    pub fn config(mut self, config: Configuration) -> Self {
        self.config = Some(config);
        self
    }

    fn resolve_database_path(&self, config: &Configuration) -> PathBuf {
        config.database_path.clone().unwrap_or_else(|| {
            self.config_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."))
                .join(DEFAULT_DATABASE_FILE_NAME)
        })
    }

    /// Consumes the builder and initializes the server.
    ///
    /// # Process
    /// 1. Loads and validates the YAML configuration
    /// 2. Opens (creating if absent) the SQLite request store
    /// 3. Constructs the Path Resolver and Request API
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed or invalid, or if
    /// the database cannot be opened.
    pub async fn build(self) -> Result<Server> {
        let probe: Arc<dyn Probe> = Arc::new(LocalStorage::new());

        let config = match self.config {
            Some(config) => config,
            None => load_and_validate(&self.config_path, probe.as_ref())
                .context("Critical: configuration is malformed")?,
        };

        let database_path = self.resolve_database_path(&config);
        info!(path = %database_path.display(), "opening request store");

        let store = Arc::new(
            SqliteRequestStore::open(&database_path, config.read_pool_size, probe.clone())
                .context("Failed to open request store")?,
        );

        let resolver = Arc::new(PathResolver::new(config.storage_areas.clone()));
        let api = Arc::new(RequestApi::new(store.clone(), resolver, probe, config.concurrency));
        let recall = Arc::new(RecallHandoff::new(store));

        let state = AppState { api, recall, config: Arc::new(config) };

        Ok(Server { state })
    }
}

/// A fully initialized server instance ready to run.
#[must_use = "call .run().await to start the server"]
#[derive(Debug)]
pub struct Server {
    state: AppState,
}

impl Server {
    /// Returns a new [`ServerBuilder`] to configure the server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Starts the server and runs until a shutdown signal is received.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the configured port.
    pub async fn run(self) -> Result<()> {
        let address = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.state.config.port);

        info!(address = %address, "Starting server");

        let app = router::init(self.state);

        let handle = Handle::<SocketAddr>::new();
        let shutdown_handle = handle.clone();

        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!("Error while waiting for shutdown signal: {e}");
                return;
            }
            info!("Shutdown signal received, starting graceful shutdown...");
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
        });

        axum_server::bind(address)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTP server failed")?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Returns a reference to the application state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }
}

/// Listens for shutdown signals (Ctrl+C, SIGTERM).
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res.context("Ctrl+C signal received")?;
        },
        res = terminate => {
            res.context("SIGTERM signal received")?;
        },
    }

    Ok(())
}
