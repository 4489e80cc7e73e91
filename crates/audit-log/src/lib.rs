//! Append-only structured JSON-lines audit logging for ircveil.
//!
//! The proxy core never writes to a global logger for events an operator may
//! want to replay later (sessions opened and closed, refused connections,
//! filter failures on the relay path, chain reloads). Instead every component
//! receives an [`AuditSink`] handle and submits [`AuditEntry`] values to it.
//! Each entry is serialised as a single newline-terminated JSON object and
//! appended to a log file, producing a [JSON Lines](https://jsonlines.org/)
//! stream.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/ircveil/audit.jsonl").await?;
//!
//! sink.log(AuditEntry::new(
//!     AuditEventType::ProcessStarted,
//!     AuditSource::new("ircveil"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```
//!
//! Deployments without an audit file use [`AuditSink::discard`], which keeps
//! the same API but drops every entry.

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
