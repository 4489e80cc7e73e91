use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Encryption settings: display prefixes and which key protects which target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Prepended to every successfully decrypted payload.
    #[serde(default, alias = "prefixencrypted")]
    pub prefix_encrypted: String,

    /// Prepended to unencrypted payloads from an encrypted target.
    #[serde(default, alias = "prefixplain")]
    pub prefix_plain: String,

    /// Regex tolerated in front of the encrypted marker on inbound payloads.
    #[serde(default, alias = "ignoreprefix")]
    pub ignore_prefix: String,

    #[serde(default)]
    pub keys: Vec<KeyBinding>,
}

/// One key string and the target patterns it protects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub key: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl EncryptionConfig {
    /// Build from a target-pattern to key map plus the named string
    /// properties `prefixencrypted`, `prefixplain` and `ignoreprefix`.
    pub fn from_maps<I>(targets: I, properties: &HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let property = |name: &str| properties.get(name).cloned().unwrap_or_default();
        Self {
            prefix_encrypted: property("prefixencrypted"),
            prefix_plain: property("prefixplain"),
            ignore_prefix: property("ignoreprefix"),
            keys: targets
                .into_iter()
                .map(|(target, key)| KeyBinding {
                    key,
                    targets: vec![target],
                })
                .collect(),
        }
    }

    /// `(target pattern, key)` pairs in configuration order. A pattern bound
    /// more than once keeps its first position and its last key.
    pub fn targets(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for binding in &self.keys {
            for target in &binding.targets {
                match pairs.iter_mut().find(|(pattern, _)| pattern == target) {
                    Some(existing) => existing.1 = binding.key.clone(),
                    None => pairs.push((target.clone(), binding.key.clone())),
                }
            }
        }
        pairs
    }
}
