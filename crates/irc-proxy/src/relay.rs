use std::fmt;
use std::sync::Arc;

use filter_chain::{FilterChain, FilterError};

use crate::connection::LineReader;
use crate::session::Session;

/// Direction of line flow through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client -> server, through [`FilterChain::send`].
    Upstream,
    /// Server -> client, through [`FilterChain::receive`].
    Downstream,
}

impl Direction {
    pub(crate) fn apply(self, chain: &mut FilterChain, line: &str) -> Result<String, FilterError> {
        match self {
            Direction::Upstream => chain.send(line),
            Direction::Downstream => chain.receive(line),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->server"),
            Direction::Downstream => f.write_str("server->client"),
        }
    }
}

/// Read lines from one side of `session` and forward them to the other until
/// the stream ends or a write fails, then tear the whole session down.
pub(crate) async fn relay_lines(session: Arc<Session>, mut reader: LineReader, direction: Direction) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(session_id = %session.id(), %direction, "end of stream");
                break;
            }
            Err(err) => {
                tracing::debug!(session_id = %session.id(), %direction, %err, "read error, closing relay");
                break;
            }
        };

        if let Err(err) = session.forward(direction, line).await {
            tracing::debug!(session_id = %session.id(), %direction, %err, "write error, closing relay");
            break;
        }
    }

    session.close().await;
}
