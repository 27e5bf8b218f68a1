//! Connection and stream metadata supplied by the surrounding proxy.
//!
//! These are plain data carriers: the proxy fills them in, the attribute
//! builder and the filters read them.

use std::net::SocketAddr;

use http::Version;

/// TLS identity of a connection, as extracted by the proxy's TLS layer.
///
/// Empty strings mean "not present in the certificate".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// URI SAN of the certificate this proxy presented
    pub local_uri_san: String,
    /// Subject of the certificate this proxy presented
    pub local_subject: String,
    /// URI SAN of the peer's certificate
    pub peer_uri_san: String,
    /// Subject of the peer's certificate
    pub peer_subject: String,
}

impl TlsInfo {
    /// Principal of the local end: URI SAN, falling back to subject.
    pub fn local_principal(&self) -> &str {
        first_non_empty(&self.local_uri_san, &self.local_subject)
    }

    /// Principal of the peer: URI SAN, falling back to subject.
    pub fn peer_principal(&self) -> &str {
        first_non_empty(&self.peer_uri_san, &self.peer_subject)
    }
}

fn first_non_empty<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    if preferred.is_empty() {
        fallback
    } else {
        preferred
    }
}

/// Downstream connection the request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Address this proxy accepted the connection on
    pub local_address: SocketAddr,
    /// Address of the connecting client
    pub remote_address: SocketAddr,
    /// TLS identity, `None` for plaintext connections
    pub tls: Option<TlsInfo>,
}

impl ConnectionInfo {
    /// Plaintext connection.
    pub fn new(local_address: SocketAddr, remote_address: SocketAddr) -> Self {
        Self {
            local_address,
            remote_address,
            tls: None,
        }
    }

    /// Attaches TLS identity.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsInfo) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Why a stream ended the way it did, for access logs and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseFlag {
    /// The request was rejected by the external authorization service, or
    /// the service failed and the filter is configured fail-closed.
    UnauthorizedExternalService,
}

/// Per-stream request information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Request bytes received from downstream so far
    pub bytes_received: u64,
    /// Downstream protocol, when the codec has determined it
    pub protocol: Option<Version>,
    response_flags: Vec<ResponseFlag>,
}

impl StreamInfo {
    /// Stream info with a known protocol.
    pub fn new(bytes_received: u64, protocol: Option<Version>) -> Self {
        Self {
            bytes_received,
            protocol,
            response_flags: Vec::new(),
        }
    }

    /// Marks the stream with `flag`. Setting a flag twice is a no-op.
    pub fn set_response_flag(&mut self, flag: ResponseFlag) {
        if !self.response_flags.contains(&flag) {
            self.response_flags.push(flag);
        }
    }

    /// Returns `true` if `flag` was set on this stream.
    pub fn has_response_flag(&self, flag: ResponseFlag) -> bool {
        self.response_flags.contains(&flag)
    }
}

/// Canonical protocol string for a known HTTP version.
///
/// Returns `None` for versions the proxy does not report on.
pub fn protocol_string(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_10 => Some("HTTP/1.0"),
        Version::HTTP_11 => Some("HTTP/1.1"),
        Version::HTTP_2 => Some("HTTP/2"),
        Version::HTTP_3 => Some("HTTP/3"),
        _ => None,
    }
}
