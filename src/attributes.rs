//! Attribute context: the request and connection metadata sent with a check.
//!
//! The context is built fresh for every check and moved into the
//! [`CheckRequest`](crate::client::CheckRequest), so it never outlives the call
//! that consumes it. Building never fails: a missing header, TLS session or
//! protocol degrades to an empty value.
//!
//! # Header map
//!
//! `request.headers` maps lower-cased names to a single value. When a name
//! occurs more than once the last occurrence wins and earlier values are
//! dropped. Services that need every value of a repeated header must not rely
//! on this map.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionInfo, StreamInfo, protocol_string};

/// Header carrying the name of the service that sent the request, as stamped
/// by the downstream proxy.
pub const DOWNSTREAM_SERVICE_CLUSTER: HeaderName =
    HeaderName::from_static("x-envoy-downstream-service-cluster");

/// One end of the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Socket address of this end
    pub address: Option<SocketAddr>,
    /// TLS identity (URI SAN, else subject); empty without TLS
    pub principal: String,
    /// Caller-supplied service label; only ever set on the source
    pub service: String,
}

impl Peer {
    /// Describes the local (`local = true`) or remote end of `connection`.
    pub fn from_connection(connection: &ConnectionInfo, service: Option<&str>, local: bool) -> Self {
        let (address, principal) = if local {
            (
                connection.local_address,
                connection.tls.as_ref().map(|tls| tls.local_principal()),
            )
        } else {
            (
                connection.remote_address,
                connection.tls.as_ref().map(|tls| tls.peer_principal()),
            )
        };

        Self {
            address: Some(address),
            principal: principal.unwrap_or_default().to_string(),
            service: service.unwrap_or_default().to_string(),
        }
    }
}

/// The HTTP request being authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Stream identifier
    pub id: String,
    pub method: String,
    /// Path including query string
    pub path: String,
    pub host: String,
    pub scheme: String,
    /// Request bytes received so far
    pub size: u64,
    /// Protocol string, present only when the codec reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Lower-cased name to value; last occurrence wins
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    /// Snapshots `head` as seen by stream `stream_id`.
    pub fn from_head(stream_id: u64, stream_info: &StreamInfo, head: &Parts) -> Self {
        let method = head.method.as_str().to_string();
        let path = head
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let authority = head.uri.authority().map(|a| a.as_str().to_string());
        let host = authority
            .clone()
            .or_else(|| header_str(&head.headers, &header::HOST))
            .unwrap_or_default();
        let scheme = head.uri.scheme_str().unwrap_or_default().to_string();

        let mut headers = BTreeMap::new();
        headers.insert(":method".to_string(), method.clone());
        if !path.is_empty() {
            headers.insert(":path".to_string(), path.clone());
        }
        if let Some(authority) = authority {
            headers.insert(":authority".to_string(), authority);
        }
        if !scheme.is_empty() {
            headers.insert(":scheme".to_string(), scheme.clone());
        }
        for (name, value) in &head.headers {
            // HeaderMap yields every value of a repeated name in order, so
            // the last one is what remains.
            headers.insert(name.as_str().to_ascii_lowercase(), lossy(value));
        }

        Self {
            id: stream_id.to_string(),
            method,
            path,
            host,
            scheme,
            size: stream_info.bytes_received,
            protocol: stream_info
                .protocol
                .and_then(protocol_string)
                .map(str::to_string),
            headers,
        }
    }
}

/// Structured request/connection metadata for one check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeContext {
    /// The client end of the connection
    pub source: Peer,
    /// This proxy's end of the connection
    pub destination: Peer,
    /// The HTTP request; empty for L4 checks
    pub request: HttpRequest,
}

impl AttributeContext {
    /// Builds the context from connection state, a request snapshot and the
    /// optional downstream service label.
    pub fn build(
        connection: &ConnectionInfo,
        request: HttpRequest,
        downstream_service: Option<&str>,
    ) -> Self {
        Self {
            source: Peer::from_connection(connection, downstream_service, false),
            destination: Peer::from_connection(connection, None, true),
            request,
        }
    }

    /// Context for an HTTP check. The downstream service label comes from
    /// [`DOWNSTREAM_SERVICE_CLUSTER`].
    pub fn for_http(
        connection: &ConnectionInfo,
        stream_id: u64,
        stream_info: &StreamInfo,
        head: &Parts,
    ) -> Self {
        let service = header_str(&head.headers, &DOWNSTREAM_SERVICE_CLUSTER).filter(|s| !s.is_empty());
        Self::build(
            connection,
            HttpRequest::from_head(stream_id, stream_info, head),
            service.as_deref(),
        )
    }

    /// Context for a TCP check: peers only.
    pub fn for_tcp(connection: &ConnectionInfo) -> Self {
        Self::build(connection, HttpRequest::default(), None)
    }
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers.get(name).map(lossy)
}

fn lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
