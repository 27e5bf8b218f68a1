//! Error types for configuration loading, the authorization transport and
//! logging setup.
//!
//! Request-time authorization never surfaces these to callers: transport
//! failures are folded into [`CheckStatus::Error`](crate::client::CheckStatus)
//! by the client, and the filter applies the fail-open/fail-closed policy.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating filter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML did not match the configuration schema
    #[error("config parse error: {details}")]
    Parse {
        /// Parser error details
        details: String,
    },

    /// A required field was missing or empty
    #[error("missing required config field: {field}")]
    MissingField {
        /// Name of the field
        field: &'static str,
    },

    /// An allow-list or header-to-add entry is not a valid HTTP header name
    #[error("invalid header name {name:?} in {field}")]
    InvalidHeaderName {
        /// Offending name
        name: String,
        /// Config field it appeared in
        field: &'static str,
    },

    /// A header-to-add value is not a valid HTTP header value
    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue {
        /// Header the value belongs to
        name: String,
    },

    /// Authorization service URI is malformed or not http/https
    #[error("invalid server_uri {uri:?}: {details}")]
    InvalidUri {
        /// The configured URI
        uri: String,
        /// Why it was rejected
        details: String,
    },

    /// HTTP client for the authorization service could not be built
    #[error("failed to build HTTP client: {details}")]
    HttpClient {
        /// Builder error details
        details: String,
    },

    /// Timeout string could not be parsed as a duration
    #[error("invalid timeout {value:?}: {details}")]
    InvalidTimeout {
        /// The configured value
        value: String,
        /// Parser error details
        details: String,
    },
}

/// Errors produced by a [`CheckTransport`](crate::client::transport::CheckTransport).
///
/// Every variant maps to `CheckStatus::Error`; the distinction exists for
/// logging only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Authorization service could not be reached
    #[error("authorization service unreachable: {details}")]
    Unreachable {
        /// Connection error details
        details: String,
    },

    /// Authorization service did not answer in time
    #[error("authorization check timed out after {timeout:?}")]
    Timeout {
        /// Configured timeout
        timeout: Duration,
    },

    /// Authorization service answered with something that is not a verdict
    #[error("malformed authorization response: {details}")]
    Malformed {
        /// What was wrong with the response
        details: String,
    },

    /// The check call itself could not be constructed
    #[error("invalid check request: {details}")]
    InvalidRequest {
        /// What was wrong with the request
        details: String,
    },
}

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed
    #[error("tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}
