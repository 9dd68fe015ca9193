//! Live-syncing development server.
//!
//! This crate serves a directory tree over HTTP and keeps connected browser
//! tabs in sync with on-disk changes:
//! - Static files, with the sync script injected into markup
//! - Reverse-proxy routes, with the same injection for upstream markup
//! - A websocket sync channel delivering reload, stylesheet refresh,
//!   navigation and hot body patches
//! - A worker pool validating edited markup before it is hot patched
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use lvs_server::{ServerConfig, run_server};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = ServerConfig {
//!         root: PathBuf::from("public"),
//!         port: 5555,
//!         ..ServerConfig::default()
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (lvs-server)
//!                        │
//!                        ├─► /__lvs/ws, /__lvs/status, /__lvs/sync.js
//!                        │       │
//!                        │       └─► ClientRegistry ◄── Orchestrator
//!                        │                                  ▲    │
//!                        │                 ChangeBus (notify)┘    └─► WorkerPool
//!                        │
//!                        ├─► Proxy routes ──► upstream (reqwest)
//!                        │
//!                        └─► Static site (mounts, clean URLs, injection)
//! ```

mod app;
mod error;
pub mod inject;
pub mod live_reload;
pub mod middleware;
pub mod proxy;
mod state;
pub mod sync;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use lvs_config::{DotfilesPolicy, MountConfig, PatchFailurePolicy, ProxyConfig};
use lvs_pool::{MarkupValidator, PoolConfig, WorkerPool};
use lvs_protocol::InitParams;
use state::AppState;
use tokio::task::JoinHandle;

pub use error::ServerError;
pub use inject::{Injection, Site, StaticRoot};
pub use live_reload::{ChangeBus, Orchestrator, ReloadPolicy};
pub use middleware::MiddlewareRegistry;
pub use proxy::{ProxyForwarder, RetryPolicy};
pub use sync::{ClientRegistry, SyncSettings};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Served directory or file.
    pub root: PathBuf,
    /// Additional roots under route prefixes.
    pub mounts: Vec<MountConfig>,
    /// Reverse-proxy routes.
    pub proxies: Vec<ProxyConfig>,
    /// Dotfile handling.
    pub dotfiles: DotfilesPolicy,
    /// Middleware names, outermost first.
    pub middleware: Vec<String>,
    /// Enable live reload.
    pub live_reload_enabled: bool,
    /// Inject the sync script into markup.
    pub inject: bool,
    /// Client behavior when a hot patch fails.
    pub patch_failure: PatchFailurePolicy,
    /// Sync channel settings.
    pub sync: SyncSettings,
    /// How changes are announced.
    pub reload: ReloadPolicy,
    /// Quiet period before a change is reported.
    pub debounce: Duration,
    /// Glob patterns excluded from watching.
    pub ignore: Vec<String>,
    /// Worker threads for hot patching.
    pub workers: usize,
    /// Spacing between worker deliveries.
    pub rate_limit: Duration,
    /// Interpreter for server-side scripts.
    pub exec_path: Option<PathBuf>,
    /// Interpreter configuration file.
    pub exec_config_path: Option<PathBuf>,
    /// Retry policy for proxy routes.
    pub proxy_retry: RetryPolicy,
    /// Enable verbose output.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5555,
            root: PathBuf::from("."),
            mounts: Vec::new(),
            proxies: Vec::new(),
            dotfiles: DotfilesPolicy::default(),
            middleware: Vec::new(),
            live_reload_enabled: true,
            inject: true,
            patch_failure: PatchFailurePolicy::default(),
            sync: SyncSettings::default(),
            reload: ReloadPolicy::default(),
            debounce: Duration::from_millis(50),
            ignore: Vec::new(),
            workers: 2,
            rate_limit: lvs_pool::DEFAULT_RATE_LIMIT,
            exec_path: None,
            exec_config_path: None,
            proxy_retry: RetryPolicy::default(),
            verbose: false,
        }
    }
}

/// A configured server, not yet bound to a socket.
///
/// Owns the client registry, the file watcher and the worker pool. Dropping
/// it stops the watcher; call [`shutdown`](Self::shutdown) to also stop the
/// workers and remove their scratch space.
pub struct LiveServer {
    router: Router,
    clients: Arc<ClientRegistry>,
    pool: Option<WorkerPool>,
    bus: Option<ChangeBus>,
    orchestrator: Option<JoinHandle<()>>,
}

impl LiveServer {
    /// Build the server with the built-in middleware.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(config: &ServerConfig) -> Result<Self, ServerError> {
        Self::build_with(config, &MiddlewareRegistry::with_builtins())
    }

    /// Build the server, resolving middleware names in `registry`.
    pub fn build_with(
        config: &ServerConfig,
        registry: &MiddlewareRegistry,
    ) -> Result<Self, ServerError> {
        let middleware = registry.resolve(&config.middleware)?;

        let injection = (config.live_reload_enabled && config.inject)
            .then(|| Injection::new(config.patch_failure));

        let mut site = Site::new(
            canonical(&config.root)?,
            config.dotfiles,
            injection.clone(),
        );
        for mount in &config.mounts {
            site = site.with_mount(StaticRoot::new(&mount.route, canonical(&mount.path)?));
        }

        let forwarders = config
            .proxies
            .iter()
            .map(|proxy| {
                ProxyForwarder::new(proxy, injection.clone())
                    .map(|forwarder| Arc::new(forwarder.with_retry(config.proxy_retry)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let clients = Arc::new(ClientRegistry::new());
        let state = Arc::new(AppState {
            clients: Arc::clone(&clients),
            sync: config.sync.clone(),
            site: site.clone(),
            live_reload: config.live_reload_enabled,
        });
        let router = app::create_router(state, &forwarders, &middleware);

        let mut server = Self {
            router,
            clients,
            pool: None,
            bus: None,
            orchestrator: None,
        };
        if config.live_reload_enabled {
            server.start_live_reload(config, site)?;
        }
        Ok(server)
    }

    fn start_live_reload(&mut self, config: &ServerConfig, site: Site) -> Result<(), ServerError> {
        let roots = site.roots().map(|root| root.path().to_path_buf()).collect();
        let mut bus = ChangeBus::new(roots, &config.ignore, config.debounce);
        let changes = bus.start()?;

        let mut orchestrator = Orchestrator::new(Arc::clone(&self.clients), site, config.reload);
        let mut pool_events = None;
        if config.reload.hot {
            let pool_config = PoolConfig {
                workers: config.workers,
                rate_limit: config.rate_limit,
                init: InitParams {
                    exec_path: config.exec_path.clone(),
                    config_path: config.exec_config_path.clone(),
                    cwd: canonical(&config.root)?,
                },
            };
            let (pool, events) = WorkerPool::spawn(pool_config, MarkupValidator::new)?;
            orchestrator = orchestrator.with_pool(pool.clone(), config.workers.max(1));
            pool_events = Some(events);
            self.pool = Some(pool);
        }

        self.orchestrator = Some(tokio::spawn(orchestrator.run(changes, pool_events)));
        self.bus = Some(bus);
        Ok(())
    }

    /// The application router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Connected clients.
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Stop watching, stop the workers and remove their scratch space.
    pub async fn shutdown(mut self) {
        self.bus = None;
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.abort();
        }
        if let Some(pool) = self.pool.take() {
            pool.terminate().await;
        }
    }
}

/// Resolve `path` to an absolute path matching what the watcher reports.
fn canonical(path: &Path) -> Result<PathBuf, ServerError> {
    Ok(std::fs::canonicalize(path)?)
}

/// Run the server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    run_server_with(config, &MiddlewareRegistry::with_builtins()).await
}

/// Run the server with a custom middleware registry.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server_with(
    config: ServerConfig,
    registry: &MiddlewareRegistry,
) -> Result<(), ServerError> {
    let address = format!("{}:{}", config.host, config.port);
    let addr: SocketAddr = address
        .parse()
        .map_err(|source| ServerError::Address { address, source })?;

    let server = LiveServer::build_with(&config, registry)?;

    tracing::info!(address = %addr, root = %config.root.display(), "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    server.shutdown().await;
    served?;
    Ok(())
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from lvs config.
///
/// # Arguments
///
/// * `config` - lvs configuration
/// * `verbose` - Enable verbose output
#[must_use]
pub fn server_config_from_config(config: &lvs_config::Config, verbose: bool) -> ServerConfig {
    let live_reload = &config.live_reload;
    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        root: config.root.clone(),
        mounts: config.mounts.clone(),
        proxies: config.proxies.clone(),
        dotfiles: config.server.dotfiles,
        middleware: config.server.middleware.clone(),
        live_reload_enabled: live_reload.enabled,
        inject: live_reload.inject,
        patch_failure: live_reload.on_patch_failure,
        sync: SyncSettings {
            wait: Duration::from_millis(live_reload.wait_ms),
            remote_logs: live_reload.remote_logs,
        },
        reload: ReloadPolicy {
            inject_css: live_reload.inject_css,
            css_silent: live_reload.css_silent,
            hot: live_reload.hot,
            navigate: live_reload.navigate,
        },
        debounce: Duration::from_millis(live_reload.debounce_ms),
        ignore: live_reload.ignore.clone(),
        workers: config.workers.count,
        rate_limit: Duration::from_millis(config.workers.rate_limit_ms),
        exec_path: config.workers.exec_path.clone(),
        exec_config_path: config.workers.config_path.clone(),
        proxy_retry: RetryPolicy::default(),
        verbose,
    }
}
