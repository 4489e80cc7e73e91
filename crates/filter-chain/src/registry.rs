use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::filter::{Filter, FilterChain};

/// Constructor for one filter instance.
pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no filter named '{0}' is registered")]
    UnknownFilter(String),
}

/// Name-to-constructor lookup assembled at startup.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<FilterFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// A resolved filter configuration that builds fresh chains on demand.
///
/// Resolution happens once, in [`ChainBuilder::new`], so an unknown name is
/// reported before anything is installed. [`build`](Self::build) itself cannot
/// fail.
#[derive(Clone, Default)]
pub struct ChainBuilder {
    names: Vec<String>,
    factories: Vec<FilterFactory>,
}

impl ChainBuilder {
    /// Resolve `names` in order. Blank names are skipped.
    pub fn new<S: AsRef<str>>(registry: &FilterRegistry, names: &[S]) -> Result<Self, ChainError> {
        let mut resolved = Vec::with_capacity(names.len());
        let mut factories = Vec::with_capacity(names.len());

        for name in names.iter().map(|n| n.as_ref().trim()).filter(|n| !n.is_empty()) {
            let factory = registry
                .get(name)
                .ok_or_else(|| ChainError::UnknownFilter(name.to_string()))?;
            tracing::trace!(filter = name, "resolved filter");
            resolved.push(name.to_string());
            factories.push(factory);
        }

        Ok(Self {
            names: resolved,
            factories,
        })
    }

    /// Builder for the null chain.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Construct a new, independent chain instance.
    pub fn build(&self) -> FilterChain {
        FilterChain::new(self.factories.iter().map(|factory| factory()).collect())
    }
}

impl fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("names", &self.names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::TagFilter;
    use crate::linebreak::LineSplitFilter;

    fn registry() -> FilterRegistry {
        let mut registry = FilterRegistry::new();
        registry.register("a", || Box::new(TagFilter("a")));
        registry.register("b", || Box::new(TagFilter("b")));
        registry.register("linebreak", || Box::new(LineSplitFilter::new(40)));
        registry
    }

    #[test]
    fn builds_chain_in_configured_order() {
        let builder = ChainBuilder::new(&registry(), &["b", "a"]).unwrap();
        let mut chain = builder.build();
        assert_eq!(chain.send("x").unwrap(), "x>b>a");
        assert_eq!(chain.receive("x").unwrap(), "x<a<b");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = ChainBuilder::new(&registry(), &["a", "rot13"]).unwrap_err();
        assert!(matches!(err, ChainError::UnknownFilter(ref name) if name == "rot13"));
    }

    #[test]
    fn blank_names_are_skipped() {
        let builder = ChainBuilder::new(&registry(), &["", " a ", ""]).unwrap();
        assert_eq!(builder.names(), ["a".to_string()]);
    }

    #[test]
    fn empty_builder_yields_null_chain() {
        let builder = ChainBuilder::new::<&str>(&registry(), &[]).unwrap();
        let mut chain = builder.build();
        assert!(chain.is_empty());
        assert_eq!(chain.send("hello").unwrap(), "hello");
    }

    #[test]
    fn built_chains_do_not_share_state() {
        let builder = ChainBuilder::new(&registry(), &["linebreak"]).unwrap();
        let mut first = builder.build();
        let mut second = builder.build();

        let fragment = format!(":bob!b@h PRIVMSG #c :{}part one", crate::CONTINUATION_INDICATOR);
        assert_eq!(first.receive(&fragment).unwrap(), "");

        // The second instance never saw the fragment, so the final piece
        // passes through untouched.
        let last = ":bob!b@h PRIVMSG #c : two";
        assert_eq!(second.receive(last).unwrap(), last);
        assert_eq!(
            first.receive(last).unwrap(),
            ":bob!b@h PRIVMSG #c :part one two"
        );
    }

    #[test]
    fn registry_lists_sorted_names() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["a", "b", "linebreak"]);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }
}
