//! Header allow-lists applied where headers cross between the authorization
//! service and the request/response being authorized.
//!
//! Names are matched case-insensitively. `http::HeaderName` is always
//! lower-case, so exact matches compare names directly and prefix matches
//! compare against lower-cased prefixes.

use std::collections::HashSet;

use http::{HeaderName, HeaderValue};

/// A set of header names and name prefixes permitted across one boundary.
///
/// An empty list matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderAllowList {
    exact: HashSet<HeaderName>,
    prefixes: Vec<String>,
}

impl HeaderAllowList {
    /// Allow-list of exact names only.
    pub fn new(names: impl IntoIterator<Item = HeaderName>) -> Self {
        Self {
            exact: names.into_iter().collect(),
            prefixes: Vec::new(),
        }
    }

    /// Adds name prefixes to the list. Prefixes are lower-cased.
    #[must_use]
    pub fn with_prefixes<S: AsRef<str>>(mut self, prefixes: impl IntoIterator<Item = S>) -> Self {
        self.prefixes.extend(
            prefixes
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .filter(|p| !p.is_empty()),
        );
        self
    }

    /// Returns `true` if nothing is allowed.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }

    /// Returns `true` if `name` is allowed by exact name or by prefix.
    pub fn allows(&self, name: &HeaderName) -> bool {
        self.exact.contains(name) || self.allows_prefix(name.as_str())
    }

    /// String form of [`allows`](Self::allows), for names that are not yet
    /// parsed into a `HeaderName` (attribute-context keys).
    pub fn allows_str(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        match HeaderName::from_bytes(lower.as_bytes()) {
            Ok(parsed) => self.allows(&parsed),
            Err(_) => false,
        }
    }

    fn allows_prefix(&self, lower_name: &str) -> bool {
        self.prefixes.iter().any(|p| lower_name.starts_with(p.as_str()))
    }

    /// Keeps only the allowed `(name, value)` pairs, preserving order.
    pub fn filter<I>(&self, headers: I) -> Vec<(HeaderName, HeaderValue)>
    where
        I: IntoIterator<Item = (HeaderName, HeaderValue)>,
    {
        headers
            .into_iter()
            .filter(|(name, _)| self.allows(name))
            .collect()
    }
}

impl FromIterator<HeaderName> for HeaderAllowList {
    fn from_iter<T: IntoIterator<Item = HeaderName>>(iter: T) -> Self {
        Self::new(iter)
    }
}
