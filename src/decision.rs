//! Policy evaluation: what the filter does with a check result.
//!
//! | status | failure_mode_allow | decision |
//! |--------|--------------------|----------|
//! | Ok     | any                | continue with allow-listed upstream headers |
//! | Denied | any                | deny with the service's reply |
//! | Error  | false              | deny with a bare 403 |
//! | Error  | true               | continue, flagged as failure-mode-allowed |
//!
//! Allow-lists on headers coming back from the service are applied here and
//! nowhere else.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use tracing::warn;

use crate::client::{CheckResult, CheckStatus};
use crate::config::FilterConfig;
use crate::headers::HeaderAllowList;

/// Local reply sent downstream when a request is denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedReply {
    pub status: StatusCode,
    /// Service headers that passed `allowed_client_headers`
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Present only when the service returned a non-empty body
    pub body: Option<Bytes>,
}

impl DeniedReply {
    /// Builds the reply for a denied (or fail-closed errored) check.
    ///
    /// Uses the service's status when it is nonzero and not 403, otherwise
    /// 403.
    pub fn from_result(result: CheckResult, client_headers: &HeaderAllowList) -> Self {
        let status = deny_status(result.status_code());
        let (headers, body) = result.into_parts();
        Self {
            status,
            headers: client_headers.filter(headers),
            body: (!body.is_empty()).then_some(body),
        }
    }

    /// Splits into a header-only response and the optional body.
    pub fn into_response(self) -> (Response<()>, Option<Bytes>) {
        let mut response = Response::new(());
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        (response, self.body)
    }
}

impl Default for DeniedReply {
    /// Bare 403.
    fn default() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            headers: Vec::new(),
            body: None,
        }
    }
}

fn deny_status(code: u16) -> StatusCode {
    if code == 0 || code == StatusCode::FORBIDDEN.as_u16() {
        return StatusCode::FORBIDDEN;
    }
    StatusCode::from_u16(code).unwrap_or_else(|_| {
        warn!(status_code = code, "authorization service returned an invalid status, using 403");
        StatusCode::FORBIDDEN
    })
}

/// What the filter does with a check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through.
    Continue {
        /// Service headers to add to the upstream request
        upstream_headers: Vec<(HeaderName, HeaderValue)>,
        /// The service failed and fail-open let the request through
        failure_mode_allowed: bool,
    },

    /// Stop the request and send `DeniedReply` downstream.
    Deny(DeniedReply),
}

impl Decision {
    /// Applies `config` to `result`.
    pub fn evaluate(config: &FilterConfig, result: CheckResult) -> Self {
        match result.status() {
            CheckStatus::Ok => {
                let (headers, _) = result.into_parts();
                Decision::Continue {
                    upstream_headers: config.allowed_upstream_headers().filter(headers),
                    failure_mode_allowed: false,
                }
            }
            CheckStatus::Denied => {
                Decision::Deny(DeniedReply::from_result(result, config.allowed_client_headers()))
            }
            CheckStatus::Error if config.failure_mode_allow() => Decision::Continue {
                upstream_headers: Vec::new(),
                failure_mode_allowed: true,
            },
            CheckStatus::Error => Decision::Deny(DeniedReply::default()),
        }
    }

}

impl Default for Decision {
    /// Fail-closed: deny with a bare 403.
    fn default() -> Self {
        Decision::Deny(DeniedReply::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(n: &'static str, v: &'static str) -> (HeaderName, HeaderValue) {
        (HeaderName::from_static(n), HeaderValue::from_static(v))
    }

    fn config(fail_open: bool) -> FilterConfig {
        FilterConfig::new("authz")
            .with_failure_mode_allow(fail_open)
            .with_allowed_client_headers(HeaderAllowList::new([HeaderName::from_static("x-reason")]))
            .with_allowed_upstream_headers(HeaderAllowList::new([HeaderName::from_static("x-user-id")]))
    }

    #[test]
    fn test_ok_keeps_only_upstream_allowed_headers() {
        let result = CheckResult::ok(vec![pair("x-user-id", "alice"), pair("x-reason", "fine")]);
        assert_eq!(
            Decision::evaluate(&config(false), result),
            Decision::Continue {
                upstream_headers: vec![pair("x-user-id", "alice")],
                failure_mode_allowed: false,
            }
        );
    }

    #[test]
    fn test_denied_without_details_is_bare_forbidden() {
        let decision = Decision::evaluate(&config(false), CheckResult::denied(0, Vec::new(), Bytes::new()));
        assert_eq!(decision, Decision::Deny(DeniedReply::default()));
    }

    #[test]
    fn test_denied_with_status_headers_and_body() {
        let result = CheckResult::denied(
            401,
            vec![pair("x-reason", "nope"), pair("x-user-id", "alice")],
            Bytes::from_static(b"denied"),
        );
        let Decision::Deny(reply) = Decision::evaluate(&config(false), result) else {
            panic!("expected deny");
        };
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.headers, vec![pair("x-reason", "nope")]);
        assert_eq!(reply.body, Some(Bytes::from_static(b"denied")));
    }

    #[test]
    fn test_denied_with_invalid_status_falls_back_to_forbidden() {
        let result = CheckResult::denied(42, Vec::new(), Bytes::new());
        let Decision::Deny(reply) = Decision::evaluate(&config(false), result) else {
            panic!("expected deny");
        };
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_fail_closed_denies() {
        let decision = Decision::evaluate(&config(false), CheckResult::error());
        assert!(matches!(decision, Decision::Deny(_)));
        assert_eq!(decision, Decision::default());
    }

    #[test]
    fn test_error_fail_open_continues() {
        let decision = Decision::evaluate(&config(true), CheckResult::error());
        assert_eq!(
            decision,
            Decision::Continue {
                upstream_headers: Vec::new(),
                failure_mode_allowed: true,
            }
        );
    }

    #[test]
    fn test_denied_ignores_fail_open() {
        let decision = Decision::evaluate(&config(true), CheckResult::denied(0, Vec::new(), Bytes::new()));
        assert!(matches!(decision, Decision::Deny(_)));
    }

    #[test]
    fn test_into_response_carries_status_and_headers() {
        let reply = DeniedReply {
            status: StatusCode::UNAUTHORIZED,
            headers: vec![pair("x-reason", "nope")],
            body: None,
        };
        let (response, body) = reply.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-reason"], "nope");
        assert!(body.is_none());
    }
}
