use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use filter_chain::ChainBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::charset::Charset;
use crate::connection::Connection;
use crate::relay::{relay_lines, Direction};
use crate::session::Session;

/// Configuration for the intercepting proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Host of the real chat server every session is paired with.
    pub upstream_host: String,
    pub upstream_port: u16,
    /// Encoding used on both sockets of every session.
    pub charset: Charset,
    /// Sessions beyond this many are refused, not queued.
    pub max_sessions: usize,
    pub dial_timeout: Duration,
    /// Delay between half-closing a socket and releasing it.
    pub close_grace: Duration,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_grace: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6667)),
            upstream_host: "localhost".to_string(),
            upstream_port: 6667,
            charset: Charset::Utf8,
            max_sessions: 64,
            dial_timeout: Duration::from_secs(10),
            close_grace: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Live sessions and the chain builder; one lock covers both so that
/// registration and reload never interleave.
struct Registry {
    builder: ChainBuilder,
    sessions: HashMap<Uuid, Arc<Session>>,
    shutting_down: bool,
}

struct Shared {
    config: ProxyConfig,
    registry: parking_lot::Mutex<Registry>,
    permits: Arc<Semaphore>,
    audit: AuditSink,
}

/// The intercepting proxy.
///
/// Accepts client connections, dials the fixed upstream for each, and relays
/// lines in both directions through a per-session filter chain built from the
/// current [`ChainBuilder`].
#[derive(Clone)]
pub struct Proxy {
    shared: Arc<Shared>,
}

impl Proxy {
    pub fn new(config: ProxyConfig, builder: ChainBuilder, audit: AuditSink) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            shared: Arc::new(Shared {
                config,
                registry: parking_lot::Mutex::new(Registry {
                    builder,
                    sessions: HashMap::new(),
                    shutting_down: false,
                }),
                permits,
                audit,
            }),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.shared.config
    }

    /// Bind `listen_addr` and serve until `shutdown` turns true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.shared.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` turns true (or
    /// its sender goes away), then close every session.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let local_addr = listener.local_addr().context("listener has no local address")?;
        tracing::info!(
            addr = %local_addr,
            upstream = %format!("{}:{}", self.shared.config.upstream_host, self.shared.config.upstream_port),
            "irc-proxy listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => self.admit(stream, remote_addr).await,
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                    }
                },
            }
        }

        drop(listener);
        tracing::info!("listener closed, shutting down sessions");
        self.shutdown_sessions().await;
        Ok(())
    }

    async fn admit(&self, stream: TcpStream, remote_addr: SocketAddr) {
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    %remote_addr,
                    max_sessions = self.shared.config.max_sessions,
                    "session pool saturated, refusing connection"
                );
                drop(stream);
                self.shared
                    .audit
                    .log(AuditEntry::new(
                        AuditEventType::SessionRefused,
                        AuditSource {
                            remote_addr: Some(remote_addr.to_string()),
                            ..AuditSource::new("irc-proxy")
                        },
                        serde_json::json!({ "reason": "session pool saturated" }),
                    ))
                    .await;
                return;
            }
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(handle_connection(shared, stream, remote_addr, permit));
    }

    /// Swap in a new chain configuration and give every live session a
    /// fresh instance of it.
    pub async fn set_filter_chain(&self, builder: ChainBuilder) {
        let (names, sessions) = {
            let mut registry = self.shared.registry.lock();
            for session in registry.sessions.values() {
                session.install_chain(builder.build());
            }
            registry.builder = builder;
            (registry.builder.names().to_vec(), registry.sessions.len())
        };

        tracing::info!(filters = ?names, sessions, "filter chain reloaded");
        self.shared
            .audit
            .log(AuditEntry::new(
                AuditEventType::FilterChainReloaded,
                AuditSource::new("irc-proxy"),
                serde_json::json!({ "filters": names, "sessions": sessions }),
            ))
            .await;
    }

    /// Names of the filters new sessions get.
    pub fn filter_names(&self) -> Vec<String> {
        self.shared.registry.lock().builder.names().to_vec()
    }

    /// Number of registered (dialed and relaying) sessions.
    pub fn session_count(&self) -> usize {
        self.shared.registry.lock().sessions.len()
    }

    async fn shutdown_sessions(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut registry = self.shared.registry.lock();
            registry.shutting_down = true;
            registry.sessions.values().cloned().collect()
        };
        tracing::info!(count = sessions.len(), "closing sessions");

        let grace = self.shared.config.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        let mut closing = JoinSet::new();
        for session in sessions {
            closing.spawn(async move { session.close().await });
        }
        let closed = tokio::time::timeout_at(deadline, async {
            while closing.join_next().await.is_some() {}
        })
        .await;
        if closed.is_err() {
            tracing::warn!(pending = closing.len(), ?grace, "sessions still closing at shutdown deadline");
            closing.detach_all();
        }

        let max = u32::try_from(self.shared.config.max_sessions).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout_at(deadline, self.shared.permits.acquire_many(max)).await;
        if drained.is_err() {
            let remaining = self.shared.config.max_sessions - self.shared.permits.available_permits();
            tracing::warn!(remaining, "shutdown grace elapsed, abandoning sessions");
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("listen_addr", &self.shared.config.listen_addr)
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// Take one accepted socket from dial through registration. The client read
/// loop starts immediately; lines that arrive before the upstream is up are
/// held in the session backlog.
async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    permit: OwnedSemaphorePermit,
) {
    let config = &shared.config;
    let (client, client_reader) =
        match Connection::new("client", stream, config.charset, config.close_grace) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%remote_addr, %err, "could not set up client connection");
                return;
            }
        };
    let session = Arc::new(
        Session::new(remote_addr, client, shared.audit.clone()).with_permit(permit),
    );
    let session_id = session.id();

    let weak: Weak<Shared> = Arc::downgrade(&shared);
    session.on_close(move || {
        if let Some(shared) = weak.upgrade() {
            shared.registry.lock().sessions.remove(&session_id);
        }
    });

    tracing::debug!(%session_id, %remote_addr, "client accepted");
    tokio::spawn(relay_lines(Arc::clone(&session), client_reader, Direction::Upstream));

    let upstream = (config.upstream_host.as_str(), config.upstream_port);
    let dialed = match tokio::time::timeout(config.dial_timeout, TcpStream::connect(upstream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {:?}", config.dial_timeout)),
    };
    let server_stream = match dialed {
        Ok(stream) => stream,
        Err(reason) => {
            tracing::warn!(%session_id, %remote_addr, upstream = %format!("{}:{}", upstream.0, upstream.1), %reason, "upstream unreachable");
            shared
                .audit
                .log(AuditEntry::new(
                    AuditEventType::UpstreamUnreachable,
                    AuditSource::new("irc-proxy").with_session(session_id, remote_addr),
                    serde_json::json!({
                        "upstream": format!("{}:{}", upstream.0, upstream.1),
                        "error": reason,
                    }),
                ))
                .await;
            session.close().await;
            return;
        }
    };

    let (server, server_reader) =
        match Connection::new("server", server_stream, config.charset, config.close_grace) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%session_id, %err, "could not set up upstream connection");
                session.close().await;
                return;
            }
        };

    let registered = {
        let mut registry = shared.registry.lock();
        if registry.shutting_down || session.is_stopping() {
            false
        } else {
            session.install_chain(registry.builder.build());
            registry.sessions.insert(session_id, Arc::clone(&session));
            true
        }
    };
    if !registered {
        server.close().await;
        session.close().await;
        return;
    }

    if let Err(err) = session.attach_server(Arc::clone(&server)).await {
        tracing::debug!(%session_id, %err, "backlog flush failed");
        session.close().await;
        return;
    }
    tokio::spawn(relay_lines(Arc::clone(&session), server_reader, Direction::Downstream));

    tracing::info!(%session_id, %remote_addr, "session opened");
    shared
        .audit
        .log(AuditEntry::new(
            AuditEventType::SessionOpened,
            AuditSource::new("irc-proxy").with_session(session_id, remote_addr),
            serde_json::json!({
                "upstream": format!("{}:{}", upstream.0, upstream.1),
            }),
        ))
        .await;
}
