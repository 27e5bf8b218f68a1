//! Filter configuration.
//!
//! Configuration is read once (YAML), validated into [`FilterConfig`] /
//! [`TcpFilterConfig`], and shared read-only behind an `Arc` by every filter
//! instance.
//!
//! ```yaml
//! cluster: ext-authz
//! failure_mode_allow: false
//! allowed_request_headers: [authorization, cookie]
//! allowed_request_header_prefixes: [x-auth-]
//! authorization_headers_to_add:
//!   - key: x-edge-proxy
//!     value: edge-1
//! allowed_client_headers: [www-authenticate, x-reason]
//! allowed_upstream_headers: [x-user-id]
//! http_service:
//!   server_uri: http://127.0.0.1:9000
//!   path_prefix: /check
//!   timeout: 200ms
//! ```

use std::path::Path;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::headers::HeaderAllowList;

const DEFAULT_TIMEOUT: &str = "200ms";

// ============================================================================
// Raw (serde) configuration
// ============================================================================

/// A header appended to every check call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderToAdd {
    pub key: String,
    pub value: String,
}

/// Raw-HTTP authorization service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpServiceSpec {
    /// Base URI of the authorization service
    pub server_uri: String,
    /// Prepended to the original request path
    #[serde(default)]
    pub path_prefix: String,
    /// Per-check timeout, humantime format (`200ms`, `1s`)
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

/// HTTP filter configuration as written in YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtAuthzConfig {
    /// Cluster hosting the authorization service
    pub cluster: String,
    /// Let requests through when the service cannot be queried
    #[serde(default)]
    pub failure_mode_allow: bool,
    /// Request headers copied onto the check call
    #[serde(default)]
    pub allowed_request_headers: Vec<String>,
    /// Request header prefixes copied onto the check call
    #[serde(default)]
    pub allowed_request_header_prefixes: Vec<String>,
    #[serde(default)]
    pub authorization_headers_to_add: Vec<HeaderToAdd>,
    /// Service headers returned to the client on deny
    #[serde(default)]
    pub allowed_client_headers: Vec<String>,
    /// Service headers added to the upstream request on allow
    #[serde(default)]
    pub allowed_upstream_headers: Vec<String>,
    #[serde(default)]
    pub http_service: Option<HttpServiceSpec>,
}

/// TCP filter configuration as written in YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpExtAuthzConfig {
    pub stat_prefix: String,
    #[serde(default)]
    pub failure_mode_allow: bool,
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Validated raw-HTTP service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpService {
    pub server_uri: Url,
    pub path_prefix: String,
    pub timeout: Duration,
}

/// Validated, immutable HTTP filter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    cluster: String,
    failure_mode_allow: bool,
    allowed_request_headers: HeaderAllowList,
    authorization_headers_to_add: Vec<(HeaderName, HeaderValue)>,
    allowed_client_headers: HeaderAllowList,
    allowed_upstream_headers: HeaderAllowList,
    http_service: Option<HttpService>,
}

impl FilterConfig {
    /// Fail-closed configuration with empty allow-lists.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            failure_mode_allow: false,
            allowed_request_headers: HeaderAllowList::default(),
            authorization_headers_to_add: Vec::new(),
            allowed_client_headers: HeaderAllowList::default(),
            allowed_upstream_headers: HeaderAllowList::default(),
            http_service: None,
        }
    }

    #[must_use]
    pub fn with_failure_mode_allow(mut self, allow: bool) -> Self {
        self.failure_mode_allow = allow;
        self
    }

    #[must_use]
    pub fn with_allowed_request_headers(mut self, list: HeaderAllowList) -> Self {
        self.allowed_request_headers = list;
        self
    }

    #[must_use]
    pub fn with_authorization_headers_to_add(mut self, headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        self.authorization_headers_to_add = headers;
        self
    }

    #[must_use]
    pub fn with_allowed_client_headers(mut self, list: HeaderAllowList) -> Self {
        self.allowed_client_headers = list;
        self
    }

    #[must_use]
    pub fn with_allowed_upstream_headers(mut self, list: HeaderAllowList) -> Self {
        self.allowed_upstream_headers = list;
        self
    }

    #[must_use]
    pub fn with_http_service(mut self, service: HttpService) -> Self {
        self.http_service = Some(service);
        self
    }

    /// Parses and validates YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        parse_yaml::<ExtAuthzConfig>(yaml)?.try_into()
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&read_file(path.as_ref())?)
    }

    /// Cluster hosting the authorization service.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// `true` if service failures let requests through.
    pub fn failure_mode_allow(&self) -> bool {
        self.failure_mode_allow
    }

    /// Request headers (names and prefixes) sent to the service.
    pub fn allowed_request_headers(&self) -> &HeaderAllowList {
        &self.allowed_request_headers
    }

    pub fn authorization_headers_to_add(&self) -> &[(HeaderName, HeaderValue)] {
        &self.authorization_headers_to_add
    }

    /// Service headers returned to the client on deny.
    pub fn allowed_client_headers(&self) -> &HeaderAllowList {
        &self.allowed_client_headers
    }

    /// Service headers added to the upstream request on allow.
    pub fn allowed_upstream_headers(&self) -> &HeaderAllowList {
        &self.allowed_upstream_headers
    }

    pub fn http_service(&self) -> Option<&HttpService> {
        self.http_service.as_ref()
    }
}

impl TryFrom<ExtAuthzConfig> for FilterConfig {
    type Error = ConfigError;

    fn try_from(raw: ExtAuthzConfig) -> Result<Self, Self::Error> {
        if raw.cluster.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "cluster" });
        }

        let allowed_request_headers =
            allow_list(&raw.allowed_request_headers, "allowed_request_headers")?
                .with_prefixes(&raw.allowed_request_header_prefixes);

        let authorization_headers_to_add = raw
            .authorization_headers_to_add
            .iter()
            .map(|h| {
                let name = header_name(&h.key, "authorization_headers_to_add")?;
                let value = HeaderValue::from_str(&h.value).map_err(|_| {
                    ConfigError::InvalidHeaderValue {
                        name: h.key.clone(),
                    }
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let http_service = raw.http_service.as_ref().map(validate_http_service).transpose()?;

        Ok(Self {
            cluster: raw.cluster,
            failure_mode_allow: raw.failure_mode_allow,
            allowed_request_headers,
            authorization_headers_to_add,
            allowed_client_headers: allow_list(&raw.allowed_client_headers, "allowed_client_headers")?,
            allowed_upstream_headers: allow_list(
                &raw.allowed_upstream_headers,
                "allowed_upstream_headers",
            )?,
            http_service,
        })
    }
}

/// Validated TCP filter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFilterConfig {
    stat_prefix: String,
    failure_mode_allow: bool,
}

impl TcpFilterConfig {
    pub fn new(stat_prefix: impl Into<String>, failure_mode_allow: bool) -> Self {
        Self {
            stat_prefix: stat_prefix.into(),
            failure_mode_allow,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        parse_yaml::<TcpExtAuthzConfig>(yaml)?.try_into()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&read_file(path.as_ref())?)
    }

    /// Label under which this filter's stats are recorded.
    pub fn stat_prefix(&self) -> &str {
        &self.stat_prefix
    }

    pub fn failure_mode_allow(&self) -> bool {
        self.failure_mode_allow
    }
}

impl TryFrom<TcpExtAuthzConfig> for TcpFilterConfig {
    type Error = ConfigError;

    fn try_from(raw: TcpExtAuthzConfig) -> Result<Self, Self::Error> {
        if raw.stat_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "stat_prefix",
            });
        }
        Ok(Self::new(raw.stat_prefix, raw.failure_mode_allow))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_yaml<T: DeserializeOwned + 'static>(yaml: &str) -> Result<T, ConfigError> {
    serde_yml::from_str(yaml).map_err(|e| ConfigError::Parse {
        details: e.to_string(),
    })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn header_name(name: &str, field: &'static str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes()).map_err(|_| {
        ConfigError::InvalidHeaderName {
            name: name.to_string(),
            field,
        }
    })
}

fn allow_list(names: &[String], field: &'static str) -> Result<HeaderAllowList, ConfigError> {
    names
        .iter()
        .map(|n| header_name(n, field))
        .collect::<Result<HeaderAllowList, _>>()
}

fn validate_http_service(spec: &HttpServiceSpec) -> Result<HttpService, ConfigError> {
    let server_uri = Url::parse(&spec.server_uri).map_err(|e| ConfigError::InvalidUri {
        uri: spec.server_uri.clone(),
        details: e.to_string(),
    })?;
    if !matches!(server_uri.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUri {
            uri: spec.server_uri.clone(),
            details: format!("unsupported scheme {:?}", server_uri.scheme()),
        });
    }
    if !spec.path_prefix.is_empty() && !spec.path_prefix.starts_with('/') {
        return Err(ConfigError::InvalidUri {
            uri: spec.server_uri.clone(),
            details: format!("path_prefix {:?} must start with '/'", spec.path_prefix),
        });
    }
    let timeout = humantime::parse_duration(&spec.timeout).map_err(|e| ConfigError::InvalidTimeout {
        value: spec.timeout.clone(),
        details: e.to_string(),
    })?;

    Ok(HttpService {
        server_uri,
        path_prefix: spec.path_prefix.clone(),
        timeout,
    })
}
