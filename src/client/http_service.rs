//! Raw-HTTP binding for the authorization service.
//!
//! The check is sent as an HTTP request mirroring the original one: same
//! method, `server_uri + path_prefix + path`, an empty body, and only the
//! request headers the configuration allows. A `200` answer allows the
//! request; any other status denies it and is relayed to the client.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use super::CheckRequest;
use super::transport::{CheckResponse, CheckTransport, DeniedHttpResponse, OkHttpResponse};
use crate::config::FilterConfig;
use crate::error::{ConfigError, TransportError};
use crate::headers::HeaderAllowList;

/// [`CheckTransport`] that talks to an HTTP authorization service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server_uri: Url,
    path_prefix: String,
    timeout: Duration,
    allowed_request_headers: HeaderAllowList,
    headers_to_add: Vec<(HeaderName, HeaderValue)>,
}

impl HttpTransport {
    /// Builds the transport from the `http_service` section of `config`.
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let service = config.http_service().ok_or(ConfigError::MissingField {
            field: "http_service",
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            server_uri: service.server_uri.clone(),
            path_prefix: service.path_prefix.clone(),
            timeout: service.timeout,
            allowed_request_headers: config.allowed_request_headers().clone(),
            headers_to_add: config.authorization_headers_to_add().to_vec(),
        })
    }

    fn check_url(&self, path: &str) -> Result<Url, TransportError> {
        let base = self.server_uri.as_str().trim_end_matches('/');
        let url = format!("{base}{}{path}", self.path_prefix);
        Url::parse(&url).map_err(|e| TransportError::InvalidRequest {
            details: format!("check URL {url:?}: {e}"),
        })
    }

    /// Allow-listed request headers plus the configured additions.
    ///
    /// Pseudo-headers and framing headers belong to the check call itself
    /// and are never copied.
    fn check_headers(&self, request: &CheckRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.attributes.request.headers {
            if name.starts_with(':') || !self.allowed_request_headers.allows_str(name) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                trace!(header = %name, "skipping header that cannot be re-encoded");
                continue;
            };
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == HOST {
                continue;
            }
            headers.append(name, value);
        }
        for (name, value) in &self.headers_to_add {
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    fn map_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                timeout: self.timeout,
            }
        } else if error.is_builder() {
            TransportError::InvalidRequest {
                details: error.to_string(),
            }
        } else if error.is_body() || error.is_decode() {
            TransportError::Malformed {
                details: error.to_string(),
            }
        } else {
            TransportError::Unreachable {
                details: error.to_string(),
            }
        }
    }
}

fn raw_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[async_trait]
impl CheckTransport for HttpTransport {
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse, TransportError> {
        let attributes = &request.attributes.request;
        let url = self.check_url(&attributes.path)?;
        let method = if attributes.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(attributes.method.as_bytes()).map_err(|e| {
                TransportError::InvalidRequest {
                    details: format!("method {:?}: {e}", attributes.method),
                }
            })?
        };
        let headers = self.check_headers(&request);

        debug!(%method, %url, stream_id = %attributes.id, "sending authorization check");
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .header(CONTENT_LENGTH, 0)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = raw_headers(response.headers());
        if status == StatusCode::OK {
            return Ok(CheckResponse::Allowed(OkHttpResponse { headers }));
        }

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(CheckResponse::Denied(DeniedHttpResponse {
            status_code: status.as_u16(),
            headers,
            body,
        }))
    }
}
