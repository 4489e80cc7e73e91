use std::sync::LazyLock;

use filter_chain::message::{self, Inbound, Outbound};
use filter_chain::{Filter, FilterError, LineSplitFilter, DEFAULT_MAX_LINE_LENGTH};
use regex::Regex;

use crate::config::EncryptionConfig;
use crate::encryptor::Encryptor;
use crate::keys::KeyParser;

/// Leads every encrypted payload on the wire.
pub const ENCRYPTED_MARKER: &str = "<birch>";

/// A payload starting with this is sent unencrypted, marker stripped.
pub const PLAIN_MARKER: &str = "<plain>";

const SEALED: &str = r"(?P<sealed><birch>\|\S+\|\S+)";

static BARE_SEALED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{SEALED}$")).expect("sealed payload pattern compiles"));

struct Target {
    pattern: String,
    matcher: Regex,
    encryptor: Box<dyn Encryptor>,
}

/// Encrypts `PRIVMSG` payloads for configured targets and decrypts them on
/// the way back.
///
/// Targets are whole-string, case-sensitive regexes checked in configuration
/// order. Outbound ciphertext goes through an embedded [`LineSplitFilter`];
/// inbound lines are reassembled by it before decryption.
pub struct EncryptionFilter {
    targets: Vec<Target>,
    splitter: LineSplitFilter,
    encrypted: Regex,
    prefix_encrypted: String,
    prefix_plain: String,
}

impl EncryptionFilter {
    pub fn new(config: &EncryptionConfig) -> Self {
        Self::with_line_limit(config, DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_line_limit(config: &EncryptionConfig, max_line_length: usize) -> Self {
        let parser = KeyParser::default();
        let mut targets = Vec::new();

        for (pattern, key) in config.targets() {
            let matcher = match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(matcher) => matcher,
                Err(err) => {
                    tracing::warn!(target_pattern = %pattern, %err, "invalid target pattern, target excluded");
                    continue;
                }
            };
            match parser.parse(&key) {
                Ok(encryptor) => {
                    tracing::debug!(target_pattern = %pattern, ?encryptor, "encryption enabled");
                    targets.push(Target {
                        pattern,
                        matcher,
                        encryptor,
                    });
                }
                Err(err) => {
                    tracing::warn!(target_pattern = %pattern, %err, "unusable key, target excluded");
                }
            }
        }

        Self {
            targets,
            splitter: LineSplitFilter::new(max_line_length),
            encrypted: encrypted_pattern(&config.ignore_prefix),
            prefix_encrypted: config.prefix_encrypted.clone(),
            prefix_plain: config.prefix_plain.clone(),
        }
    }

    /// Configured target patterns that ended up with a usable key.
    pub fn target_patterns(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.pattern.as_str()).collect()
    }

    pub fn is_encrypted_target(&self, name: &str) -> bool {
        self.target_for(name).is_some()
    }

    fn target_for(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.matcher.is_match(name))
    }

    fn open(&self, identity: &str, encryptor: &dyn Encryptor, sealed: &str) -> String {
        let mut parts = sealed.splitn(3, '|').skip(1);
        let (Some(iv), Some(body)) = (parts.next(), parts.next()) else {
            return sealed.to_string();
        };
        match encryptor.decrypt(iv, body) {
            Ok(plain) => {
                let plain = plain.replace(['\r', '\n'], " ");
                format!("{}{plain}", self.prefix_encrypted)
            }
            Err(err) => {
                tracing::warn!(identity, %err, "decryption failed, passing ciphertext through");
                sealed.to_string()
            }
        }
    }
}

fn encrypted_pattern(ignore_prefix: &str) -> Regex {
    if !ignore_prefix.is_empty() {
        match Regex::new(&format!("^(?:{ignore_prefix})?{SEALED}$")) {
            Ok(pattern) => return pattern,
            Err(err) => {
                tracing::warn!(ignore_prefix, %err, "invalid ignore prefix, matching bare ciphertext only");
            }
        }
    }
    BARE_SEALED.clone()
}

impl Filter for EncryptionFilter {
    fn name(&self) -> &str {
        "encryption"
    }

    fn send(&mut self, line: &str) -> Result<String, FilterError> {
        let Some(msg) = Outbound::parse(line) else {
            return Ok(line.to_string());
        };

        if let Some(rest) = msg.payload.strip_prefix(PLAIN_MARKER) {
            return Ok(message::outbound(msg.target, rest));
        }

        let Some(target) = self.target_for(msg.target) else {
            return Ok(line.to_string());
        };

        match target.encryptor.encrypt(msg.payload) {
            Ok(sealed) => {
                let wrapped =
                    message::outbound(msg.target, &format!("{ENCRYPTED_MARKER}|{sealed}"));
                self.splitter.send(&wrapped)
            }
            Err(err) => {
                tracing::warn!(irc_target = msg.target, %err, "encryption failed, sending payload unencrypted");
                Ok(line.to_string())
            }
        }
    }

    fn receive(&mut self, line: &str) -> Result<String, FilterError> {
        let line = self.splitter.receive(line)?;
        if line.is_empty() {
            return Ok(line);
        }

        let Some(msg) = Inbound::parse(&line) else {
            return Ok(line);
        };
        let identity = msg.identity();
        let Some(target) = self.target_for(identity) else {
            return Ok(line);
        };

        let payload = match self.encrypted.captures(msg.payload) {
            Some(caps) => match caps.name("sealed") {
                Some(sealed) => {
                    let kept = &msg.payload[..sealed.start()];
                    let opened = self.open(identity, target.encryptor.as_ref(), sealed.as_str());
                    format!("{kept}{opened}")
                }
                None => msg.payload.to_string(),
            },
            None => format!("{}{}", self.prefix_plain, msg.payload),
        };

        Ok(msg.with_payload(&payload))
    }
}
