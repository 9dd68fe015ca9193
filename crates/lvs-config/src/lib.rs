//! Configuration management for lvs.
//!
//! Parses `lvs.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `proxy.target`
//! - `workers.exec_path`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override served root.
    pub root: Option<PathBuf>,
    /// Override live reload enabled flag.
    pub live_reload_enabled: Option<bool>,
    /// Override hot patching flag.
    pub hot: Option<bool>,
    /// Override send delay.
    pub wait_ms: Option<u64>,
    /// Additional proxy routes.
    pub proxies: Vec<ProxyConfig>,
    /// Additional mounts.
    pub mounts: Vec<MountConfig>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "lvs.toml";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,
    /// Worker pool configuration.
    pub workers: WorkersConfig,
    /// Reverse proxy routes (`[[proxy]]`).
    #[serde(rename = "proxy")]
    pub proxies: Vec<ProxyConfig>,
    /// Extra roots mounted on route prefixes (`[[mount]]`).
    #[serde(rename = "mount")]
    pub mounts: Vec<MountConfig>,

    /// Resolved served root (set after loading).
    #[serde(skip)]
    pub root: PathBuf,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Served root relative to the config file (file or directory).
    root: Option<String>,
    /// How requests for dotfiles are answered.
    pub dotfiles: DotfilesPolicy,
    /// Named middleware applied to every request, outermost first.
    pub middleware: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5555,
            root: None,
            dotfiles: DotfilesPolicy::default(),
            middleware: Vec::new(),
        }
    }
}

/// Dotfile handling policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotfilesPolicy {
    /// Serve dotfiles like any other file.
    Allow,
    /// Answer 403.
    Deny,
    /// Pretend the file does not exist (404).
    #[default]
    Ignore,
}

/// What a client does when a hot patch cannot be applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchFailurePolicy {
    /// Show a persistent error banner and wait for the next change.
    #[default]
    Banner,
    /// Fall back to a full reload.
    Reload,
}

impl PatchFailurePolicy {
    /// Name used on the wire (script query parameter).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Reload => "reload",
        }
    }
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether live reload is enabled.
    pub enabled: bool,
    /// Delay before an instruction is flushed to a client.
    pub wait_ms: u64,
    /// Filesystem event debounce window.
    pub debounce_ms: u64,
    /// Inject the sync script into markup responses.
    pub inject: bool,
    /// Refresh stylesheets in place instead of reloading.
    pub inject_css: bool,
    /// Suppress the client notification on stylesheet refresh.
    pub css_silent: bool,
    /// Hot patch markup bodies through the worker pool.
    pub hot: bool,
    /// Navigate clients to changed markup files nobody is displaying.
    pub navigate: bool,
    /// Forward client console output to the server log.
    pub remote_logs: bool,
    /// Client behavior when a hot patch fails.
    pub on_patch_failure: PatchFailurePolicy,
    /// Glob patterns (relative to the root) excluded from watching.
    pub ignore: Vec<String>,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_ms: 100,
            debounce_ms: 50,
            inject: true,
            inject_css: true,
            css_silent: false,
            hot: true,
            navigate: false,
            remote_logs: false,
            on_patch_failure: PatchFailurePolicy::default(),
            ignore: vec![
                "**/.git/**".to_owned(),
                "**/node_modules/**".to_owned(),
                "**/*.swp".to_owned(),
                "**/*~".to_owned(),
            ],
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of worker threads.
    pub count: usize,
    /// Minimum spacing between task deliveries; 0 disables rate limiting.
    pub rate_limit_ms: u64,
    /// Interpreter for server-side scripts.
    pub exec_path: Option<PathBuf>,
    /// Interpreter configuration file.
    pub config_path: Option<PathBuf>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 2,
            rate_limit_ms: 50,
            exec_path: None,
            config_path: None,
        }
    }
}

/// Reverse proxy route.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    /// Route prefix handled by the proxy (e.g. `/api`).
    pub route: String,
    /// Upstream origin, optionally with a base path.
    pub target: String,
    /// Forward the client's `Host` header instead of dropping it.
    #[serde(default)]
    pub preserve_host: bool,
    /// Stamp a `Via` header with this pseudonym.
    #[serde(default)]
    pub via: Option<String>,
    /// Rewrite `Set-Cookie` domains to the proxy host.
    #[serde(default = "default_true")]
    pub cookie_rewrite: bool,
}

impl ProxyConfig {
    /// Route with default header options.
    #[must_use]
    pub fn new(route: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            target: target.into(),
            preserve_host: false,
            via: None,
            cookie_rewrite: true,
        }
    }
}

/// Extra root mounted on a route prefix.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MountConfig {
    /// Route prefix (e.g. `/vendor`).
    pub route: String,
    /// File or directory served under the prefix.
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`proxy.target`").
        field: String,
        /// Error message (e.g., "${`API_URL`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

/// Require a route prefix to be absolute.
fn require_route(route: &str, field: &str) -> Result<(), ConfigError> {
    if !route.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{field} must start with '/' (got {route:?})"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `lvs.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) -> Result<(), ConfigError> {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(root) = &settings.root {
            self.root = std::path::absolute(root)?;
        }
        if let Some(enabled) = settings.live_reload_enabled {
            self.live_reload.enabled = enabled;
        }
        if let Some(hot) = settings.hot {
            self.live_reload.hot = hot;
        }
        if let Some(wait_ms) = settings.wait_ms {
            self.live_reload.wait_ms = wait_ms;
        }
        self.proxies.extend(settings.proxies.iter().cloned());
        for mount in &settings.mounts {
            self.mounts.push(MountConfig {
                route: mount.route.clone(),
                path: std::path::absolute(&mount.path)?,
            });
        }
        Ok(())
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    #[must_use]
    pub fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            live_reload: LiveReloadConfig::default(),
            workers: WorkersConfig::default(),
            proxies: Vec::new(),
            mounts: Vec::new(),
            root: base.to_path_buf(),
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically at the end of [`Config::load`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_workers()?;
        self.validate_routes()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 is technically valid (OS assigns a random port), but it's
        // unlikely to be intentional in a config file
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate worker pool configuration.
    fn validate_workers(&self) -> Result<(), ConfigError> {
        const MAX_WORKERS: usize = 64;

        if self.workers.count == 0 {
            return Err(ConfigError::Validation(
                "workers.count must be greater than 0".to_owned(),
            ));
        }
        if self.workers.count > MAX_WORKERS {
            return Err(ConfigError::Validation(format!(
                "workers.count cannot exceed {MAX_WORKERS}"
            )));
        }

        Ok(())
    }

    /// Validate proxy and mount routes.
    fn validate_routes(&self) -> Result<(), ConfigError> {
        for proxy in &self.proxies {
            require_route(&proxy.route, "proxy.route")?;
            require_non_empty(&proxy.target, "proxy.target")?;
            require_http_url(&proxy.target, "proxy.target")?;
        }
        for mount in &self.mounts {
            require_route(&mount.route, "mount.route")?;
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;

        for proxy in &mut self.proxies {
            proxy.target = expand::expand_env(&proxy.target, "proxy.target")?;
        }

        if let Some(ref exec_path) = self.workers.exec_path {
            let expanded = expand::expand_env(&exec_path.to_string_lossy(), "workers.exec_path")?;
            self.workers.exec_path = Some(PathBuf::from(expanded));
        }

        Ok(())
    }

    /// Resolve relative paths to absolute paths based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.root = config_dir.join(self.server.root.as_deref().unwrap_or("."));

        for mount in &mut self.mounts {
            mount.path = config_dir.join(&mount.path);
        }
        if let Some(ref config_path) = self.workers.config_path {
            self.workers.config_path = Some(config_dir.join(config_path));
        }
    }
}
