//! PRIVMSG framing shared by the filters.
//!
//! Only the message shapes filters act on are recognised; everything else is
//! opaque to them and passes through untouched.

const COMMAND: &str = "PRIVMSG";

/// A client-to-server line: `PRIVMSG <target> :<payload>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound<'a> {
    pub target: &'a str,
    pub payload: &'a str,
}

impl<'a> Outbound<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let rest = line.strip_prefix(COMMAND)?.strip_prefix(' ')?;
        let (target, payload) = rest.split_once(' ')?;
        if target.is_empty() {
            return None;
        }
        let payload = payload.strip_prefix(':')?;
        Some(Self { target, payload })
    }

    /// Everything before the payload, including the ` :` delimiter.
    pub fn prefix(&self) -> String {
        format!("{COMMAND} {} :", self.target)
    }
}

/// Serialise an outbound line.
pub fn outbound(target: &str, payload: &str) -> String {
    format!("{COMMAND} {target} :{payload}")
}

/// A server-to-client line: `:<sender> PRIVMSG <target> :<payload>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inbound<'a> {
    pub sender: &'a str,
    pub target: &'a str,
    pub payload: &'a str,
}

impl<'a> Inbound<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let rest = line.strip_prefix(':')?;
        let (sender, rest) = rest.split_once(' ')?;
        let rest = rest.strip_prefix(COMMAND)?.strip_prefix(' ')?;
        let (target, payload) = rest.split_once(' ')?;
        let payload = payload.strip_prefix(':')?;
        if sender.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self {
            sender,
            target,
            payload,
        })
    }

    /// The sender's nickname: the part of `nick!user@host` before `!`.
    pub fn nick(&self) -> &'a str {
        self.sender.split('!').next().unwrap_or(self.sender)
    }

    /// The channel for channel messages, the sender's nickname otherwise.
    pub fn identity(&self) -> &'a str {
        if is_channel(self.target) {
            self.target
        } else {
            self.nick()
        }
    }

    /// Everything before the payload, including the ` :` delimiter.
    pub fn prefix(&self) -> String {
        format!(":{} {COMMAND} {} :", self.sender, self.target)
    }

    /// Re-serialise with a different payload.
    pub fn with_payload(&self, payload: &str) -> String {
        format!("{}{payload}", self.prefix())
    }
}

pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}
