use std::collections::HashMap;

use crate::filter::{Filter, FilterError};
use crate::message::{Inbound, Outbound};

/// Marks every fragment of a split message except the last.
pub const CONTINUATION_INDICATOR: &str = "<birchLB>";

pub const DEFAULT_MAX_LINE_LENGTH: usize = 400;

/// Splits long outbound `PRIVMSG` lines and reassembles them on the way in.
///
/// Reassembly buffers are keyed by the full sender prefix and are not bounded:
/// a peer that never sends a final fragment keeps its buffer alive for the
/// lifetime of the connection.
#[derive(Debug)]
pub struct LineSplitFilter {
    max_line_length: usize,
    buffers: HashMap<String, String>,
}

impl LineSplitFilter {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            buffers: HashMap::new(),
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Number of senders with a partially received message.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for LineSplitFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Filter for LineSplitFilter {
    fn name(&self) -> &str {
        "linebreak"
    }

    fn send(&mut self, line: &str) -> Result<String, FilterError> {
        let Some(msg) = Outbound::parse(line) else {
            return Ok(line.to_string());
        };
        if line.chars().count() <= self.max_line_length {
            return Ok(line.to_string());
        }
        chop(&msg.prefix(), msg.payload, self.max_line_length)
    }

    fn receive(&mut self, line: &str) -> Result<String, FilterError> {
        let Some(msg) = Inbound::parse(line) else {
            return Ok(line.to_string());
        };

        if let Some(fragment) = msg.payload.strip_prefix(CONTINUATION_INDICATOR) {
            self.buffers
                .entry(msg.sender.to_string())
                .or_insert_with(|| msg.prefix())
                .push_str(fragment);
            return Ok(String::new());
        }

        match self.buffers.remove(msg.sender) {
            Some(mut assembled) => {
                assembled.push_str(msg.payload);
                tracing::trace!(sender = msg.sender, "reassembled split message");
                Ok(assembled)
            }
            None => Ok(line.to_string()),
        }
    }
}

/// Split `payload` into `\n`-joined lines of the form
/// `prefix [CONTINUATION_INDICATOR] fragment`, each at most
/// `max_line_length` characters long.
pub fn chop(prefix: &str, payload: &str, max_line_length: usize) -> Result<String, FilterError> {
    let overhead = prefix.chars().count() + CONTINUATION_INDICATOR.chars().count();
    if max_line_length <= overhead {
        return Err(FilterError::LineLimitTooSmall {
            limit: max_line_length,
            overhead,
        });
    }

    let room = max_line_length - prefix.chars().count();
    let chars: Vec<char> = payload.chars().collect();
    let mut out = String::with_capacity(payload.len() + prefix.len() * 2);
    let mut pos = 0;

    loop {
        if pos > 0 {
            out.push('\n');
        }
        out.push_str(prefix);

        let remaining = chars.len() - pos;
        if remaining <= room {
            out.extend(&chars[pos..]);
            break;
        }

        let end = pos + room - CONTINUATION_INDICATOR.chars().count();
        out.push_str(CONTINUATION_INDICATOR);
        out.extend(&chars[pos..end]);
        pos = end;
    }

    Ok(out)
}
