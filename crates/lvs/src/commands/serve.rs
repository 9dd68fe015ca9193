//! `lvs serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use lvs_config::{CliSettings, Config, MountConfig, ProxyConfig};
use lvs_server::{run_server, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Directory to serve (overrides config).
    root: Option<PathBuf>,

    /// Path to configuration file (default: auto-discover lvs.toml).
    #[arg(short, long, env = "LVS_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Milliseconds to wait before sending a reload (overrides config).
    #[arg(long)]
    wait: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable live reload and script injection.
    #[arg(long)]
    no_live_reload: bool,

    /// Reload on markup edits instead of hot patching.
    #[arg(long)]
    no_hot: bool,

    /// Proxy a route prefix to an upstream, e.g. `/api=http://localhost:3000`.
    #[arg(long, value_name = "ROUTE=URL", value_parser = parse_proxy)]
    proxy: Vec<ProxyConfig>,

    /// Serve a directory under a route, e.g. `/vendor=./node_modules`.
    #[arg(long, value_name = "ROUTE=PATH", value_parser = parse_mount)]
    mount: Vec<MountConfig>,
}

impl ServeArgs {
    /// Execute the serve command.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let verbose = self.verbose;
        let config_path = self.config.clone();
        let settings = self.into_settings();

        let config = Config::load(config_path.as_deref(), Some(&settings))?;

        output.serving(&format!(
            "http://{}:{}",
            config.server.host, config.server.port
        ));
        output.field("Root", &config.root.display().to_string());
        if let Some(path) = &config.config_path {
            output.field("Config", &path.display().to_string());
        }
        for mount in &config.mounts {
            output.field("Mount", &format!("{} -> {}", mount.route, mount.path.display()));
        }
        for proxy in &config.proxies {
            output.field("Proxy", &format!("{} -> {}", proxy.route, proxy.target));
        }
        output.toggle("Live reload", config.live_reload.enabled);
        if config.live_reload.enabled {
            output.toggle("Hot patch", config.live_reload.hot);
        }

        run_server(server_config_from_config(&config, verbose)).await?;
        Ok(())
    }

    fn into_settings(self) -> CliSettings {
        CliSettings {
            host: self.host,
            port: self.port,
            root: self.root,
            live_reload_enabled: self.no_live_reload.then_some(false),
            hot: self.no_hot.then_some(false),
            wait_ms: self.wait,
            proxies: self.proxy,
            mounts: self.mount,
        }
    }
}

fn split_pair<'a>(value: &'a str, what: &str) -> Result<(&'a str, &'a str), String> {
    let (route, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ROUTE={what}, got {value:?}"))?;
    if !route.starts_with('/') {
        return Err(format!("route must start with '/', got {route:?}"));
    }
    if rest.is_empty() {
        return Err(format!("missing {what} for route {route:?}"));
    }
    Ok((route, rest))
}

fn parse_proxy(value: &str) -> Result<ProxyConfig, String> {
    let (route, target) = split_pair(value, "URL")?;
    Ok(ProxyConfig::new(route, target))
}

fn parse_mount(value: &str) -> Result<MountConfig, String> {
    let (route, path) = split_pair(value, "PATH")?;
    Ok(MountConfig {
        route: route.to_owned(),
        path: PathBuf::from(path),
    })
}
