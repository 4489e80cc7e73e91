mod cli;
mod config;
mod signals;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use cipher_filter::{generate_key, Algorithm, EncryptionFilter};
use filter_chain::{ChainBuilder, FilterRegistry, LineSplitFilter};
use irc_proxy::Proxy;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::signals::{SignalEvent, Signals};

/// How long to wait for the audit writer to drain on exit.
const AUDIT_DRAIN: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Filter wiring
// ---------------------------------------------------------------------------

/// Every filter name the configuration may put in `filters.chain`, each
/// bound to the settings of `cfg`.
fn filter_registry(cfg: &Config) -> FilterRegistry {
    let max_line_length = cfg.filters.max_line_length;
    let encryption = Arc::new(cfg.encryption.clone());

    let mut registry = FilterRegistry::new();
    registry.register("linebreak", move || {
        Box::new(LineSplitFilter::new(max_line_length))
    });
    registry.register("encryption", move || {
        Box::new(EncryptionFilter::with_line_limit(&encryption, max_line_length))
    });
    registry
}

fn chain_builder(cfg: &Config) -> Result<ChainBuilder> {
    ChainBuilder::new(&filter_registry(cfg), &cfg.filters.chain)
        .context("invalid filters.chain")
}

/// Re-read the configuration file and hot-swap the filter chain. Network
/// settings only take effect on restart.
async fn reload(proxy: &Proxy, cli: &Cli, audit: &AuditSink) {
    let result = config::load(&cli.config).and_then(|mut cfg| {
        cli.apply(&mut cfg);
        chain_builder(&cfg)
    });

    match result {
        Ok(builder) => proxy.set_filter_chain(builder).await,
        Err(err) => {
            error!(error = %format!("{err:#}"), "reload failed, keeping current filter chain");
            audit
                .log(AuditEntry::new(
                    AuditEventType::ConfigReloadFailed,
                    AuditSource::new("ircveil"),
                    serde_json::json!({
                        "config_file": cli.config.display().to_string(),
                        "error": format!("{err:#}"),
                    }),
                ))
                .await;
        }
    }
}

fn keygen(algorithm: &str, bits: usize) -> Result<()> {
    let algorithm: Algorithm = algorithm.parse()?;
    let key = generate_key(algorithm, bits).context("failed to generate key")?;
    println!("{key}");
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    if let Some(Command::Keygen { ref algorithm, bits }) = cli.command {
        return keygen(algorithm, bits);
    }

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cli.apply(&mut cfg);

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let proxy_config = cfg.proxy_config()?;
    info!(
        config_file = %cli.config.display(),
        config_found = cli.config.exists(),
        listen = %proxy_config.listen_addr,
        upstream = %format!("{}:{}", proxy_config.upstream_host, proxy_config.upstream_port),
        filters = ?cfg.filters.chain,
        "ircveil starting"
    );

    // 4. Start audit logger.
    let (audit, audit_handle) = match cfg.logging.audit_log_path {
        Some(ref path) => {
            let (sink, handle) = AuditSink::start(path)
                .await
                .context("failed to start audit logger")?;
            (sink, Some(handle))
        }
        None => (AuditSink::discard(), None),
    };

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStarted,
            AuditSource::new("ircveil"),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
            }),
        ))
        .await;

    // 5. Resolve the filter chain; an unknown name is fatal at startup.
    let builder = chain_builder(&cfg)?;
    let proxy = Proxy::new(proxy_config, builder, audit.clone());

    // 6. Signals: ctrl-c / SIGTERM shut down, SIGHUP reloads.
    let mut signals = Signals::register()?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal_task = {
        let proxy = proxy.clone();
        let audit = audit.clone();
        let cli = cli.clone();
        tokio::spawn(async move {
            loop {
                match signals.next().await {
                    SignalEvent::Shutdown => {
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    SignalEvent::Reload => reload(&proxy, &cli, &audit).await,
                }
            }
        })
    };

    // 7. Serve until shutdown.
    let proxy_result = proxy.run(shutdown_rx).await;
    signal_task.abort();

    // 8. Log shutdown.
    info!("ircveil shutting down");

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStopped,
            AuditSource::new("ircveil"),
            serde_json::json!({
                "proxy_result": format!("{:?}", proxy_result),
            }),
        ))
        .await;

    drop(proxy);
    drop(audit);
    if let Some(handle) = audit_handle {
        if tokio::time::timeout(AUDIT_DRAIN, handle).await.is_err() {
            error!("audit writer did not drain in time");
        }
    }

    proxy_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher_filter::KeyBinding;

    fn config_with_chain(chain: &[&str]) -> Config {
        let mut cfg = Config::default();
        cfg.filters.chain = chain.iter().map(|s| s.to_string()).collect();
        cfg.encryption.keys.push(KeyBinding {
            key: "AES:MTIzNDU2Nzg5MDEyMzQ1Ng==".into(),
            targets: vec!["#secret".into()],
        });
        cfg
    }

    #[test]
    fn registry_knows_both_filters() {
        let registry = filter_registry(&Config::default());
        assert_eq!(registry.names(), vec!["encryption", "linebreak"]);
    }

    #[test]
    fn unknown_filter_name_is_rejected() {
        let err = chain_builder(&config_with_chain(&["encryption", "rot13"])).unwrap_err();
        assert!(format!("{err:#}").contains("rot13"));
    }

    #[test]
    fn configured_chain_encrypts_and_decrypts() {
        let builder = chain_builder(&config_with_chain(&["encryption"])).unwrap();
        let mut alice = builder.build();
        let mut bob = builder.build();

        let sent = alice.send("PRIVMSG #secret :meet at noon").unwrap();
        assert!(sent.starts_with("PRIVMSG #secret :<birch>|"));

        let received = bob
            .receive(&format!(":alice!a@host {}", sent))
            .unwrap();
        assert_eq!(received, ":alice!a@host PRIVMSG #secret :meet at noon");
    }

    #[test]
    fn line_limit_applies_to_encrypted_output() {
        let mut cfg = config_with_chain(&["encryption"]);
        cfg.filters.max_line_length = 120;
        let mut chain = chain_builder(&cfg).unwrap().build();

        let sent = chain.send(&format!("PRIVMSG #secret :{}", "x".repeat(300))).unwrap();
        assert!(sent.lines().count() > 1);
        assert!(sent.lines().all(|line| line.chars().count() <= 120));
    }

    #[test]
    fn keygen_rejects_bad_sizes() {
        assert!(keygen("AES", 100).is_err());
        assert!(keygen("DES", 128).is_err());
        assert!(keygen("aes", 192).is_ok());
    }
}
