//! Line-oriented intercepting proxy core for ircveil.
//!
//! The proxy sits between a chat client and a real server. Every accepted
//! client is paired with a freshly dialed upstream connection and a freshly
//! built [`FilterChain`](filter_chain::FilterChain); each line read from
//! either side runs through that chain before being written to the other.
//!
//! # Architecture
//!
//! ```text
//! Client  <--lines-->  irc-proxy  <--lines-->  Server
//!                          |
//!                   [Filter chain]
//!                          |
//!                    [Audit sink]
//! ```
//!
//! Sessions are bounded by a permit pool; a client beyond capacity is
//! refused. The filter configuration can be swapped at runtime with
//! [`Proxy::set_filter_chain`], which gives every live session a new chain
//! instance.

pub mod charset;
pub mod connection;
pub mod listener;
pub mod relay;
pub mod session;

pub use charset::{Charset, UnknownCharset};
pub use listener::{Proxy, ProxyConfig};
pub use relay::Direction;
pub use session::Session;

#[cfg(test)]
pub(crate) mod testing {
    use filter_chain::{Filter, FilterChain, FilterError};

    pub(crate) fn chain_of(filters: Vec<Box<dyn Filter>>) -> FilterChain {
        FilterChain::new(filters)
    }

    /// Appends a fixed suffix in both directions.
    pub(crate) struct Suffix(pub &'static str);

    impl Filter for Suffix {
        fn name(&self) -> &str {
            "suffix"
        }

        fn send(&mut self, line: &str) -> Result<String, FilterError> {
            Ok(format!("{line}{}", self.0))
        }

        fn receive(&mut self, line: &str) -> Result<String, FilterError> {
            Ok(format!("{line}{}", self.0))
        }
    }

    pub(crate) struct Failing;

    impl Filter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&mut self, _line: &str) -> Result<String, FilterError> {
            Err(FilterError::Failed {
                filter: "failing".into(),
                reason: "refusing outbound line".into(),
            })
        }

        fn receive(&mut self, _line: &str) -> Result<String, FilterError> {
            Err(FilterError::Failed {
                filter: "failing".into(),
                reason: "refusing inbound line".into(),
            })
        }
    }

    /// Swallows lines starting with `drop`.
    pub(crate) struct DropMarked;

    impl Filter for DropMarked {
        fn name(&self) -> &str {
            "drop-marked"
        }

        fn send(&mut self, line: &str) -> Result<String, FilterError> {
            self.receive(line)
        }

        fn receive(&mut self, line: &str) -> Result<String, FilterError> {
            if line.starts_with("drop") {
                Ok(String::new())
            } else {
                Ok(line.to_string())
            }
        }
    }
}
