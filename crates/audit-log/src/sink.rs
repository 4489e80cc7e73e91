use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::AuditWriter;

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// A cheap, cloneable handle used to submit [`AuditEntry`] values into the
/// background audit-log writer.
///
/// `AuditSink` is `Clone + Send + Sync` so every session task can hold its
/// own copy.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditSink {
    /// Spawn the background writer task and return a `(sink, join_handle)` pair.
    ///
    /// The task writes each entry as a JSON line, flushes after about one
    /// second of channel inactivity, and flushes once more before exiting when
    /// the last `AuditSink` clone is dropped. I/O errors are logged via
    /// `tracing::error` and the entry is skipped; the task never panics.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), crate::writer::AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);

        let mut writer = AuditWriter::new(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx: Some(tx) }, handle))
    }

    /// A sink that accepts entries and drops them.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Send an audit entry to the background writer.
    ///
    /// Waits for channel capacity when the writer is behind. If the writer
    /// task has exited the entry is dropped with a warning.
    pub async fn log(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed, entry dropped"
            );
        }
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("enabled", &self.tx.is_some())
            .finish()
    }
}

/// Drain the channel into `writer`, flushing on idle and on close.
async fn run_writer_loop(writer: &mut AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write audit entry");
                } else {
                    dirty = true;
                }
            }
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!(
                    entries = writer.entries_written(),
                    "audit writer background task shutting down"
                );
                return;
            }
            Err(_) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic audit log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}
