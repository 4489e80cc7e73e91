//! # filter-chain
//!
//! Bidirectional line filters for the ircveil proxy.
//!
//! Every proxied connection owns one [`FilterChain`]: an ordered sequence of
//! [`Filter`] instances. Client-to-server lines go through
//! [`FilterChain::send`] front to back; server-to-client lines go through
//! [`FilterChain::receive`] back to front, so the first filter sees outbound
//! text first and inbound text last.
//!
//! Chains are produced by a [`ChainBuilder`], which resolves filter names
//! against a [`FilterRegistry`] once and can then build any number of fresh,
//! independent chains.
//!
//! ```rust
//! use filter_chain::{ChainBuilder, FilterRegistry, LineSplitFilter};
//!
//! let mut registry = FilterRegistry::new();
//! registry.register("linebreak", || Box::new(LineSplitFilter::new(400)));
//!
//! let builder = ChainBuilder::new(&registry, &["linebreak"]).unwrap();
//! let mut chain = builder.build();
//! assert_eq!(chain.send("PRIVMSG #rust :hi").unwrap(), "PRIVMSG #rust :hi");
//! ```

mod filter;
mod linebreak;
pub mod message;
mod registry;

pub use filter::{Filter, FilterChain, FilterError};
pub use linebreak::{chop, LineSplitFilter, CONTINUATION_INDICATOR, DEFAULT_MAX_LINE_LENGTH};
pub use registry::{ChainBuilder, ChainError, FilterFactory, FilterRegistry};
