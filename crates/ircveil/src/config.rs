use anyhow::Context;
use cipher_filter::EncryptionConfig;
use irc_proxy::{Charset, ProxyConfig};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// No default: the server must come from here or the command line.
    #[serde(default)]
    pub upstream_host: Option<String>,
    #[serde(default = "default_port")]
    pub upstream_port: u16,
    #[serde(default)]
    pub charset: Charset,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_close_grace")]
    pub close_grace_ms: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_port(),
            upstream_host: None,
            upstream_port: default_port(),
            charset: Charset::default(),
            max_sessions: default_max_sessions(),
            dial_timeout_secs: default_dial_timeout(),
            close_grace_ms: default_close_grace(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FiltersConfig {
    /// Filter names in send order.
    #[serde(default)]
    pub chain: Vec<String>,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            chain: Vec::new(),
            max_line_length: default_max_line_length(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: None,
        }
    }
}

impl Config {
    pub fn proxy_config(&self) -> anyhow::Result<ProxyConfig> {
        let net = &self.network;
        let ip: IpAddr = net
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen address {:?}", net.listen_address))?;
        let upstream_host = net
            .upstream_host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .context("no chat server configured; pass <server_host> <server_port>")?;
        anyhow::ensure!(net.max_sessions > 0, "network.max_sessions must be at least 1");

        Ok(ProxyConfig {
            listen_addr: SocketAddr::new(ip, net.listen_port),
            upstream_host,
            upstream_port: net.upstream_port,
            charset: net.charset,
            max_sessions: net.max_sessions,
            dial_timeout: Duration::from_secs(net.dial_timeout_secs),
            close_grace: Duration::from_millis(net.close_grace_ms),
            shutdown_grace: Duration::from_secs(net.shutdown_grace_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6667
}

fn default_max_sessions() -> usize {
    64
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_close_grace() -> u64 {
    100
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_max_line_length() -> usize {
    filter_chain::DEFAULT_MAX_LINE_LENGTH
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from a YAML file. A missing file yields defaults.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}
