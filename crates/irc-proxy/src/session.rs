use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use filter_chain::{FilterChain, FilterError};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::connection::Connection;
use crate::relay::Direction;

type SharedChain = Arc<parking_lot::Mutex<FilterChain>>;
type Deregister = Box<dyn FnOnce() + Send>;

/// Where the upstream half of a session stands.
enum Link {
    /// Dialing; client lines wait here in arrival order.
    Connecting(Vec<String>),
    Relaying,
    Closed,
}

/// A client connection bound to its upstream connection.
///
/// The client side exists from accept onwards; the server side is attached
/// once the upstream dial succeeds. Each direction runs its own read loop
/// (see [`relay_lines`](crate::relay::relay_lines)) and either loop ending
/// closes both sides.
pub struct Session {
    id: Uuid,
    remote_addr: SocketAddr,
    client: Arc<Connection>,
    server: OnceLock<Arc<Connection>>,
    link: tokio::sync::Mutex<Link>,
    /// Serializes client->server delivery so the backlog flush stays ahead of
    /// lines read after it. Never taken by `close`.
    upstream_order: tokio::sync::Mutex<()>,
    chain: parking_lot::Mutex<Option<SharedChain>>,
    stopping: AtomicBool,
    on_close: parking_lot::Mutex<Option<Deregister>>,
    permit: parking_lot::Mutex<Option<OwnedSemaphorePermit>>,
    audit: AuditSink,
}

impl Session {
    pub fn new(remote_addr: SocketAddr, client: Arc<Connection>, audit: AuditSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            client,
            server: OnceLock::new(),
            link: tokio::sync::Mutex::new(Link::Connecting(Vec::new())),
            upstream_order: tokio::sync::Mutex::new(()),
            chain: parking_lot::Mutex::new(None),
            stopping: AtomicBool::new(false),
            on_close: parking_lot::Mutex::new(None),
            permit: parking_lot::Mutex::new(None),
            audit,
        }
    }

    /// Hold `permit` until the session closes.
    pub fn with_permit(self, permit: OwnedSemaphorePermit) -> Self {
        *self.permit.lock() = Some(permit);
        self
    }

    /// Run `deregister` exactly once, when the session first closes.
    pub fn on_close(&self, deregister: impl FnOnce() + Send + 'static) {
        *self.on_close.lock() = Some(Box::new(deregister));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Replace the filter chain. A transformation already running keeps the
    /// instance it started with.
    pub fn install_chain(&self, chain: FilterChain) {
        *self.chain.lock() = Some(Arc::new(parking_lot::Mutex::new(chain)));
    }

    fn audit_source(&self) -> AuditSource {
        AuditSource::new("irc-proxy").with_session(self.id, self.remote_addr)
    }

    /// Bind the upstream connection and flush the client backlog to it, in
    /// arrival order, through the current chain.
    pub async fn attach_server(&self, server: Arc<Connection>) -> io::Result<()> {
        if self.server.set(Arc::clone(&server)).is_err() {
            tracing::warn!(session_id = %self.id, "upstream already attached");
            return Ok(());
        }
        if self.is_stopping() {
            server.close().await;
            return Ok(());
        }

        let _order = self.upstream_order.lock().await;
        let backlog = {
            let mut link = self.link.lock().await;
            match std::mem::replace(&mut *link, Link::Relaying) {
                Link::Connecting(backlog) => backlog,
                Link::Relaying => Vec::new(),
                Link::Closed => {
                    *link = Link::Closed;
                    return Ok(());
                }
            }
        };

        if !backlog.is_empty() {
            tracing::debug!(session_id = %self.id, lines = backlog.len(), "flushing client backlog");
        }
        for line in &backlog {
            self.deliver(Direction::Upstream, line, &server).await?;
        }
        Ok(())
    }

    /// Forward one line read from the `direction` source to its peer.
    pub(crate) async fn forward(&self, direction: Direction, line: String) -> io::Result<()> {
        match direction {
            Direction::Downstream => self.deliver(direction, &line, &self.client).await,
            Direction::Upstream => {
                {
                    let mut link = self.link.lock().await;
                    match &mut *link {
                        Link::Connecting(backlog) => {
                            backlog.push(line);
                            return Ok(());
                        }
                        Link::Closed => return Ok(()),
                        Link::Relaying => {}
                    }
                }
                let _order = self.upstream_order.lock().await;
                match self.server.get() {
                    Some(server) => self.deliver(direction, &line, server).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn deliver(&self, direction: Direction, line: &str, peer: &Connection) -> io::Result<()> {
        let output = match self.transform(direction, line) {
            Ok(output) => output,
            Err(err) => {
                self.report_filter_failure(direction, &err).await;
                line.to_string()
            }
        };
        if output.is_empty() {
            return Ok(());
        }
        peer.write_text(&output).await
    }

    fn transform(&self, direction: Direction, line: &str) -> Result<String, FilterError> {
        let chain = self.chain.lock().clone();
        match chain {
            Some(chain) => direction.apply(&mut chain.lock(), line),
            None => Ok(line.to_string()),
        }
    }

    async fn report_filter_failure(&self, direction: Direction, err: &FilterError) {
        tracing::warn!(
            session_id = %self.id,
            %direction,
            %err,
            "filter failed, forwarding line unfiltered"
        );
        self.audit
            .log(AuditEntry::new(
                AuditEventType::FilterFailed,
                self.audit_source(),
                serde_json::json!({
                    "direction": direction.to_string(),
                    "error": err.to_string(),
                }),
            ))
            .await;
    }

    /// Close both sides and deregister. Safe to call from either read loop,
    /// from the proxy, or more than once.
    pub async fn close(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.server.get() {
            Some(server) => {
                tokio::join!(self.client.close(), server.close());
            }
            None => self.client.close().await,
        }
        *self.link.lock().await = Link::Closed;

        let deregister = self.on_close.lock().take();
        if let Some(deregister) = deregister {
            deregister();
        }
        let permit = self.permit.lock().take();
        drop(permit);

        tracing::info!(session_id = %self.id, remote_addr = %self.remote_addr, "session closed");
        self.audit
            .log(AuditEntry::new(
                AuditEventType::SessionClosed,
                self.audit_source(),
                serde_json::Value::Null,
            ))
            .await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("upstream", &self.server.get().is_some())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
