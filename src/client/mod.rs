//! Check client: one asynchronous permit/deny query per call.
//!
//! A [`Client`] is handed a [`Completion`] together with the request. The
//! client fires the completion exactly once, either before `check` returns
//! (inline) or later from another task (deferred). The caller keeps the
//! matching [`PendingCheck`] and reads the result from it.
//!
//! Cancelling drops both halves of the channel, so a completion fired after
//! cancellation is discarded and can never be observed.

pub mod http_service;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::http::{HeaderName, HeaderValue};
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{Span, trace, warn};

use crate::attributes::AttributeContext;

/// Normalized outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// The request is authorized.
    Ok,
    /// The authorization service could not be queried.
    Error,
    /// The request is denied.
    Denied,
}

/// Result of one check, as delivered to the caller.
///
/// Constructors enforce which fields each status may carry: `Ok` carries
/// headers only, `Denied` may carry headers, body and status code, `Error`
/// carries nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    status: CheckStatus,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    status_code: u16,
}

impl CheckResult {
    /// Authorized, with headers for the upstream request.
    pub fn ok(headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self {
            status: CheckStatus::Ok,
            headers,
            body: Bytes::new(),
            status_code: 0,
        }
    }

    /// Denied. `status_code` 0 means the service did not pick one.
    pub fn denied(status_code: u16, headers: Vec<(HeaderName, HeaderValue)>, body: Bytes) -> Self {
        Self {
            status: CheckStatus::Denied,
            headers,
            body,
            status_code,
        }
    }

    /// The service could not be queried.
    pub fn error() -> Self {
        Self {
            status: CheckStatus::Error,
            headers: Vec::new(),
            body: Bytes::new(),
            status_code: 0,
        }
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    /// Headers returned by the authorization service, in order.
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP status suggested by the service; 0 if unset.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Splits into headers and body.
    pub fn into_parts(self) -> (Vec<(HeaderName, HeaderValue)>, Bytes) {
        (self.headers, self.body)
    }
}

/// A check call: the attribute context is moved in and consumed by the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckRequest {
    pub attributes: AttributeContext,
}

impl CheckRequest {
    pub fn new(attributes: AttributeContext) -> Self {
        Self { attributes }
    }
}

/// Sending half of a check: fired once by the client.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<CheckResult>,
    taken: Arc<AtomicBool>,
}

impl Completion {
    /// Creates a connected completion / pending-check pair.
    pub fn channel() -> (Completion, PendingCheck) {
        let (tx, rx) = oneshot::channel();
        let taken = Arc::new(AtomicBool::new(false));
        (
            Completion {
                tx,
                taken: Arc::clone(&taken),
            },
            PendingCheck { rx, taken },
        )
    }

    /// Delivers the result. Discarded if the check was cancelled.
    pub fn complete(self, result: CheckResult) {
        if self.tx.send(result).is_err() {
            trace!("check completed after cancellation, result discarded");
        }
    }

    /// Returns `true` once the caller has cancelled or gone away.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Handle that reports when the caller has taken the result.
    pub fn receipt(&self) -> Receipt {
        Receipt(Arc::clone(&self.taken))
    }
}

/// Tells a client whether the caller has taken the result of a check.
#[derive(Debug, Clone)]
pub struct Receipt(Arc<AtomicBool>);

impl Receipt {
    /// Returns `true` once [`PendingCheck`] has handed a result to the caller.
    pub fn is_taken(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Receiving half of a check, owned by the caller while the check is
/// outstanding. Dropping it makes any later completion unobservable.
#[derive(Debug)]
pub struct PendingCheck {
    rx: oneshot::Receiver<CheckResult>,
    taken: Arc<AtomicBool>,
}

impl PendingCheck {
    /// Returns the result if the client has already completed.
    ///
    /// A client that dropped its [`Completion`] without firing it is treated
    /// as a transport failure.
    pub fn try_take(&mut self) -> Option<CheckResult> {
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => {
                warn!("check client dropped its completion without a result");
                CheckResult::error()
            }
        };
        self.taken.store(true, Ordering::Release);
        Some(result)
    }

    /// Waits for the result. Cancel-safe: dropping the future leaves the
    /// check pending.
    pub async fn wait(&mut self) -> CheckResult {
        let result = match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => {
                warn!("check client dropped its completion without a result");
                CheckResult::error()
            }
        };
        self.taken.store(true, Ordering::Release);
        result
    }
}

/// Issues authorization checks.
///
/// Each client serves one request at a time:
/// - `check` while a previous check is still outstanding panics.
/// - `cancel` with no outstanding check panics. After `cancel`, the
///   completion for that check must never be fired (or is discarded if it
///   races).
///
/// The completion may be fired before `check` returns. Callers must handle
/// both inline and deferred completion.
pub trait Client: Send {
    /// Starts a check. `parent_span` is the request's active span.
    fn check(&mut self, request: CheckRequest, completion: Completion, parent_span: &Span);

    /// Cancels the outstanding check.
    fn cancel(&mut self);
}
