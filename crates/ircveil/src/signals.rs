use anyhow::Result;
use tracing::info;

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

/// Process signals, registered once up front so a registration failure
/// surfaces at startup.
pub struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    pub fn register() -> Result<Self> {
        #[cfg(unix)]
        {
            use anyhow::Context;
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())
                    .context("failed to register SIGTERM handler")?,
                hangup: signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal of interest.
    pub async fn next(&mut self) -> SignalEvent {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT (ctrl-c)");
                    SignalEvent::Shutdown
                }
                _ = self.terminate.recv() => {
                    info!("received SIGTERM");
                    SignalEvent::Shutdown
                }
                _ = self.hangup.recv() => {
                    info!("received SIGHUP");
                    SignalEvent::Reload
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("received SIGINT (ctrl-c)");
            SignalEvent::Shutdown
        }
    }
}
