use std::fmt;

use thiserror::Error;

/// Errors a filter may raise while transforming a line.
///
/// The relay treats every variant the same way: the untransformed line is
/// forwarded and the error is reported.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error(
        "line limit {limit} leaves no room for payload after a {overhead}-character prefix"
    )]
    LineLimitTooSmall { limit: usize, overhead: usize },

    #[error("filter '{filter}' failed: {reason}")]
    Failed { filter: String, reason: String },
}

/// A bidirectional text transformer.
///
/// `send` handles client-to-server lines and `receive` handles
/// server-to-client lines. A return value may contain several lines joined by
/// `\n`; the empty string means "forward nothing".
///
/// Filters carry per-connection state and are therefore `&mut self`; an
/// instance is never shared between connections.
pub trait Filter: Send {
    /// Registry name of this filter, used in logs.
    fn name(&self) -> &str;

    fn send(&mut self, line: &str) -> Result<String, FilterError>;

    fn receive(&mut self, line: &str) -> Result<String, FilterError>;
}

/// An ordered, per-connection sequence of filters.
///
/// The empty chain is the null terminal: it returns its input unchanged in
/// both directions.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// The null chain.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter names in chain order.
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run a client-to-server line through every filter, first to last.
    pub fn send(&mut self, line: &str) -> Result<String, FilterError> {
        let mut text = line.to_string();
        for filter in self.filters.iter_mut() {
            text = filter.send(&text)?;
        }
        Ok(text)
    }

    /// Run a server-to-client line through every filter, last to first.
    pub fn receive(&mut self, line: &str) -> Result<String, FilterError> {
        let mut text = line.to_string();
        for filter in self.filters.iter_mut().rev() {
            text = filter.receive(&text)?;
        }
        Ok(text)
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Appends `>name` on the way out and `<name` on the way in.
    pub(crate) struct TagFilter(pub &'static str);

    impl Filter for TagFilter {
        fn name(&self) -> &str {
            self.0
        }

        fn send(&mut self, line: &str) -> Result<String, FilterError> {
            Ok(format!("{line}>{}", self.0))
        }

        fn receive(&mut self, line: &str) -> Result<String, FilterError> {
            Ok(format!("{line}<{}", self.0))
        }
    }

    struct FailingFilter;

    impl Filter for FailingFilter {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&mut self, _line: &str) -> Result<String, FilterError> {
            Err(FilterError::Failed {
                filter: "failing".into(),
                reason: "boom".into(),
            })
        }

        fn receive(&mut self, line: &str) -> Result<String, FilterError> {
            Ok(line.to_string())
        }
    }

    fn tagged_chain() -> FilterChain {
        FilterChain::new(vec![
            Box::new(TagFilter("f1")),
            Box::new(TagFilter("f2")),
            Box::new(TagFilter("f3")),
        ])
    }

    #[test]
    fn send_applies_filters_in_order() {
        let mut chain = tagged_chain();
        assert_eq!(chain.send("msg").unwrap(), "msg>f1>f2>f3");
    }

    #[test]
    fn receive_applies_filters_in_reverse_order() {
        let mut chain = tagged_chain();
        assert_eq!(chain.receive("msg").unwrap(), "msg<f3<f2<f1");
    }

    #[test]
    fn empty_chain_is_identity() {
        let mut chain = FilterChain::empty();
        assert!(chain.is_empty());
        assert_eq!(chain.send("PRIVMSG #a :x").unwrap(), "PRIVMSG #a :x");
        assert_eq!(chain.receive(":n!u@h PRIVMSG #a :x").unwrap(), ":n!u@h PRIVMSG #a :x");
        assert_eq!(chain.send("").unwrap(), "");
    }

    #[test]
    fn filter_error_stops_the_chain() {
        let mut chain = FilterChain::new(vec![Box::new(FailingFilter), Box::new(TagFilter("t"))]);
        let err = chain.send("msg").unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(chain.receive("msg").unwrap(), "msg<t");
    }

    #[test]
    fn debug_lists_filter_names() {
        let chain = tagged_chain();
        assert_eq!(chain.names(), vec!["f1", "f2", "f3"]);
        assert!(format!("{chain:?}").contains("f2"));
    }
}
