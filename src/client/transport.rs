//! Transport-backed check client.
//!
//! [`CheckTransport`] is the seam to whatever carries the check to the
//! authorization service. [`TransportClient`] runs one transport call per
//! check on the tokio runtime and translates the transport's outcome into a
//! [`CheckResult`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, field, info_span, warn};

use super::{CheckRequest, CheckResult, Client, Completion, Receipt};
use crate::error::TransportError;

const TRACE_STATUS: &str = "ext_authz_status";
const TRACE_OK: &str = "ext_authz_ok";
const TRACE_UNAUTHORIZED: &str = "ext_authz_unauthorized";

/// Headers and body the service wants sent back to the client on deny.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeniedHttpResponse {
    /// Suggested HTTP status; 0 if the service did not set one
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Headers the service wants added to the upstream request on allow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkHttpResponse {
    pub headers: Vec<(String, String)>,
}

/// Verdict returned by the authorization service, independent of the wire
/// format that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResponse {
    Allowed(OkHttpResponse),
    Denied(DeniedHttpResponse),
}

/// Carries a check to the authorization service.
///
/// Implementations own framing, connection pooling, TLS and timeouts; a
/// timeout is reported as an error like any other transport failure.
#[async_trait]
pub trait CheckTransport: Send + Sync {
    /// Sends one check and waits for the verdict.
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse, TransportError>;
}

/// Translates a transport outcome into a [`CheckResult`].
///
/// - Deny: status 403 unless the service supplied a nonzero code other than
///   403; header names are lower-cased.
/// - Allow: headers copied, names lower-cased.
/// - Transport failure, or a verdict with unusable headers: `Error`.
pub fn into_check_result(outcome: Result<CheckResponse, TransportError>) -> CheckResult {
    match outcome {
        Ok(CheckResponse::Allowed(ok)) => match convert_headers(&ok.headers) {
            Ok(headers) => CheckResult::ok(headers),
            Err(e) => {
                warn!(error = %e, "discarding allow verdict with invalid headers");
                CheckResult::error()
            }
        },
        Ok(CheckResponse::Denied(denied)) => match convert_headers(&denied.headers) {
            Ok(headers) => {
                let forbidden = StatusCode::FORBIDDEN.as_u16();
                let status_code = if denied.status_code != 0 && denied.status_code != forbidden {
                    denied.status_code
                } else {
                    forbidden
                };
                CheckResult::denied(status_code, headers, denied.body)
            }
            Err(e) => {
                warn!(error = %e, "discarding deny verdict with invalid headers");
                CheckResult::error()
            }
        },
        Err(e) => {
            debug!(error = %e, "authorization transport failed");
            CheckResult::error()
        }
    }
}

fn convert_headers(raw: &[(String, String)]) -> Result<Vec<(HeaderName, HeaderValue)>, TransportError> {
    raw.iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).map_err(|_| {
                TransportError::Malformed {
                    details: format!("invalid header name {name:?}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| TransportError::Malformed {
                details: format!("invalid value for header {name}"),
            })?;
            Ok((name, value))
        })
        .collect()
}

struct InFlight {
    token: CancellationToken,
    task: JoinHandle<()>,
    completed: Arc<AtomicBool>,
    receipt: Receipt,
}

impl InFlight {
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Cancellable until the caller has taken the result. A result that has
    /// been fired but not yet observed may still be cancelled.
    fn is_cancellable(&self) -> bool {
        !self.receipt.is_taken()
    }

    fn cancel(self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// [`Client`] that runs each check on a [`CheckTransport`].
///
/// `check` spawns onto the current tokio runtime and therefore panics when
/// called outside one. Dropping the client cancels any outstanding check.
pub struct TransportClient<T> {
    transport: Arc<T>,
    in_flight: Option<InFlight>,
}

impl<T: CheckTransport + 'static> TransportClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            in_flight: None,
        }
    }

    /// Returns `true` while a check has been issued and neither completed
    /// nor cancelled.
    pub fn is_outstanding(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|f| !f.is_completed())
    }
}

impl<T: CheckTransport + 'static> Client for TransportClient<T> {
    fn check(&mut self, request: CheckRequest, completion: Completion, parent_span: &Span) {
        assert!(
            !self.is_outstanding(),
            "check() called while a previous check is still outstanding"
        );

        let token = CancellationToken::new();
        let completed = Arc::new(AtomicBool::new(false));
        let receipt = completion.receipt();
        let span = info_span!(parent: parent_span, "ext_authz.check", ext_authz_status = field::Empty);

        let transport = Arc::clone(&self.transport);
        let cancelled = token.clone();
        let done = Arc::clone(&completed);
        let task = tokio::spawn(
            async move {
                if completion.is_cancelled() {
                    debug!("caller went away before the check was sent");
                    done.store(true, Ordering::Release);
                    return;
                }
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => {
                        debug!("check cancelled before the service answered");
                    }
                    outcome = transport.check(request) => {
                        match &outcome {
                            Ok(CheckResponse::Allowed(_)) => {
                                Span::current().record(TRACE_STATUS, TRACE_OK);
                            }
                            Ok(CheckResponse::Denied(_)) => {
                                Span::current().record(TRACE_STATUS, TRACE_UNAUTHORIZED);
                            }
                            Err(_) => {}
                        }
                        let result = into_check_result(outcome);
                        done.store(true, Ordering::Release);
                        completion.complete(result);
                    }
                }
            }
            .instrument(span),
        );

        self.in_flight = Some(InFlight {
            token,
            task,
            completed,
            receipt,
        });
    }

    fn cancel(&mut self) {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.is_cancellable() => in_flight.cancel(),
            _ => panic!("cancel() called with no outstanding check"),
        }
    }
}

impl<T> Drop for TransportClient<T> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel();
        }
    }
}
