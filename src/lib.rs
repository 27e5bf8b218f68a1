//! External authorization for an HTTP/TCP proxy.
//!
//! Every request (or connection) is checked against an external
//! authorization service before it may proceed:
//!
//! - [`attributes`] describes the request and its connection.
//! - [`client`] issues the check; completion may be inline or deferred.
//! - [`decision`] applies the fail-open/closed policy and header allow-lists.
//! - [`filter`] and [`network`] drive the per-request and per-connection
//!   state machines against the host pipeline.
//!
//! # Outcomes
//!
//! - **Ok:** allow-listed service headers are added to the upstream request.
//! - **Denied:** a local reply is sent downstream (403 unless the service
//!   picked another status).
//! - **Error:** denied with a bare 403, or let through when
//!   `failure_mode_allow` is set.

pub mod attributes;
pub mod client;
pub mod config;
pub mod connection;
pub mod decision;
pub mod error;
pub mod filter;
pub mod headers;
pub mod logging;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod stats;

#[cfg(test)]
mod test_helpers;
