//! TCP (L4) authorization filter.
//!
//! Checks a connection once, on its first bytes, using only the peer
//! attributes. Reading stops until the check completes. A deny, or a
//! failure while fail-closed, closes the connection.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{Span, debug, warn};

use crate::attributes::AttributeContext;
use crate::client::{CheckRequest, CheckResult, CheckStatus, Client, Completion, PendingCheck};
use crate::config::TcpFilterConfig;
use crate::connection::ConnectionInfo;
use crate::filter::State;
use crate::stats::{AuthzStats, StatsEvent};

/// Returned from the read-path entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    StopIteration,
}

/// Connection lifecycle events delivered to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    RemoteClose,
    LocalClose,
}

/// What the TCP filter can see of, and do to, its connection.
pub trait ReadFilterCallbacks: Send {
    fn connection(&self) -> &ConnectionInfo;

    fn active_span(&self) -> Span;

    /// Resumes reading after the filter returned `StopIteration`.
    fn continue_reading(&mut self);

    /// Closes the connection without flushing.
    fn close_connection(&mut self);
}

/// Per-connection external authorization filter.
pub struct TcpFilter {
    config: Arc<TcpFilterConfig>,
    client: Box<dyn Client>,
    stats: Arc<dyn AuthzStats>,
    state: State,
    stop_reading: bool,
    pending: Option<PendingCheck>,
    initiating_call: bool,
}

impl TcpFilter {
    pub fn new(config: Arc<TcpFilterConfig>, client: Box<dyn Client>, stats: Arc<dyn AuthzStats>) -> Self {
        Self {
            config,
            client,
            stats,
            state: State::NotStarted,
            stop_reading: true,
            pending: None,
            initiating_call: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn on_new_connection(&mut self) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Issues the check on the first call. Data is held until the connection
    /// is allowed.
    pub fn on_data(
        &mut self,
        callbacks: &mut dyn ReadFilterCallbacks,
        _data: &Bytes,
        _end_stream: bool,
    ) -> FilterStatus {
        if self.state == State::NotStarted {
            self.call_check(callbacks);
        }
        if self.stop_reading {
            FilterStatus::StopIteration
        } else {
            FilterStatus::Continue
        }
    }

    /// Closing the connection cancels an outstanding check.
    pub fn on_event(&mut self, event: ConnectionEvent) {
        if matches!(event, ConnectionEvent::RemoteClose | ConnectionEvent::LocalClose)
            && self.state == State::Calling
        {
            debug!(?event, "connection closed with a check outstanding, cancelling");
            self.state = State::Complete;
            self.client.cancel();
            self.pending = None;
        }
    }

    /// Waits for a deferred completion and applies it. Cancel-safe.
    pub async fn wait_for_completion(&mut self, callbacks: &mut dyn ReadFilterCallbacks) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let result = pending.wait().await;
        self.on_complete(callbacks, result);
    }

    /// Applies a check result.
    ///
    /// # Panics
    ///
    /// If the filter is not `Calling`.
    pub fn on_complete(&mut self, callbacks: &mut dyn ReadFilterCallbacks, result: CheckResult) {
        assert_eq!(
            self.state,
            State::Calling,
            "check completion delivered to a filter that is not calling"
        );
        self.state = State::Complete;
        self.pending = None;

        let target = self.config.stat_prefix();
        let status = result.status();
        match status {
            CheckStatus::Ok => self.stats.record(target, StatsEvent::Ok),
            CheckStatus::Denied => self.stats.record(target, StatsEvent::Denied),
            CheckStatus::Error => self.stats.record(target, StatsEvent::Error),
        }

        let allowed = match status {
            CheckStatus::Ok => true,
            CheckStatus::Denied => false,
            CheckStatus::Error => self.config.failure_mode_allow(),
        };

        if !allowed {
            debug!(stat_prefix = target, ?status, "connection not authorized, closing");
            callbacks.close_connection();
            return;
        }

        if status == CheckStatus::Error {
            warn!(stat_prefix = target, "authorization service failed, allowing connection");
            self.stats.record(target, StatsEvent::FailureModeAllowed);
        }
        self.stop_reading = false;
        if !self.initiating_call {
            callbacks.continue_reading();
        }
    }

    fn call_check(&mut self, callbacks: &mut dyn ReadFilterCallbacks) {
        let attributes = AttributeContext::for_tcp(callbacks.connection());
        let (completion, mut pending) = Completion::channel();

        self.state = State::Calling;
        self.initiating_call = true;
        self.client
            .check(CheckRequest::new(attributes), completion, &callbacks.active_span());
        match pending.try_take() {
            Some(result) => self.on_complete(callbacks, result),
            None => self.pending = Some(pending),
        }
        self.initiating_call = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountingStats, MockClient, MockReadCallbacks, fire};

    fn filter(client: MockClient, fail_open: bool, stats: Arc<CountingStats>) -> TcpFilter {
        TcpFilter::new(
            Arc::new(TcpFilterConfig::new("tcp_authz", fail_open)),
            Box::new(client),
            stats,
        )
    }

    fn data() -> Bytes {
        Bytes::from_static(b"hello")
    }

    #[test]
    fn test_inline_ok_lets_data_through() {
        let (client, state) = MockClient::inline(CheckResult::ok(Vec::new()));
        let mut filter = filter(client, false, Arc::default());
        let mut cb = MockReadCallbacks::default();

        assert_eq!(filter.on_new_connection(), FilterStatus::Continue);
        assert_eq!(filter.on_data(&mut cb, &data(), false), FilterStatus::Continue);
        assert_eq!(cb.continue_calls, 0);
        assert!(!cb.closed);

        // Checked once per connection.
        assert_eq!(filter.on_data(&mut cb, &data(), false), FilterStatus::Continue);
        let state = state.lock().unwrap();
        assert_eq!(state.requests.len(), 1);
        assert_eq!(
            state.requests[0].attributes.source.address,
            Some("172.16.4.2:41000".parse().unwrap())
        );
        assert_eq!(state.requests[0].attributes.request.method, "");
    }

    #[test]
    fn test_inline_deny_closes() {
        let (client, _) = MockClient::inline(CheckResult::denied(0, Vec::new(), Bytes::new()));
        let stats = Arc::new(CountingStats::default());
        let mut filter = filter(client, false, stats.clone());
        let mut cb = MockReadCallbacks::default();

        assert_eq!(filter.on_data(&mut cb, &data(), false), FilterStatus::StopIteration);
        assert!(cb.closed);
        assert_eq!(stats.events(), vec![("tcp_authz".to_string(), StatsEvent::Denied)]);
    }

    #[tokio::test]
    async fn test_deferred_ok_resumes_reading() {
        let (client, state) = MockClient::deferred();
        let mut filter = filter(client, false, Arc::default());
        let mut cb = MockReadCallbacks::default();

        assert_eq!(filter.on_data(&mut cb, &data(), false), FilterStatus::StopIteration);
        assert_eq!(filter.state(), State::Calling);

        fire(&state, CheckResult::ok(Vec::new()));
        filter.wait_for_completion(&mut cb).await;

        assert_eq!(cb.continue_calls, 1);
        assert_eq!(filter.on_data(&mut cb, &data(), false), FilterStatus::Continue);
    }

    #[tokio::test]
    async fn test_error_fail_closed_closes() {
        let (client, state) = MockClient::deferred();
        let mut filter = filter(client, false, Arc::default());
        let mut cb = MockReadCallbacks::default();

        filter.on_data(&mut cb, &data(), false);
        fire(&state, CheckResult::error());
        filter.wait_for_completion(&mut cb).await;

        assert!(cb.closed);
        assert_eq!(cb.continue_calls, 0);
    }

    #[tokio::test]
    async fn test_error_fail_open_resumes() {
        let (client, state) = MockClient::deferred();
        let stats = Arc::new(CountingStats::default());
        let mut filter = filter(client, true, stats.clone());
        let mut cb = MockReadCallbacks::default();

        filter.on_data(&mut cb, &data(), false);
        fire(&state, CheckResult::error());
        filter.wait_for_completion(&mut cb).await;

        assert!(!cb.closed);
        assert_eq!(cb.continue_calls, 1);
        assert_eq!(stats.count(StatsEvent::Error), 1);
        assert_eq!(stats.count(StatsEvent::FailureModeAllowed), 1);
    }

    #[test]
    fn test_close_while_calling_cancels() {
        let (client, state) = MockClient::deferred();
        let stats = Arc::new(CountingStats::default());
        let mut filter = filter(client, false, stats.clone());
        let mut cb = MockReadCallbacks::default();

        filter.on_data(&mut cb, &data(), false);
        filter.on_event(ConnectionEvent::Connected);
        assert_eq!(state.lock().unwrap().cancels, 0);

        filter.on_event(ConnectionEvent::RemoteClose);
        assert_eq!(state.lock().unwrap().cancels, 1);
        assert_eq!(filter.state(), State::Complete);

        fire(&state, CheckResult::ok(Vec::new()));
        assert_eq!(cb.continue_calls, 0);
        assert!(stats.events().is_empty());

        filter.on_event(ConnectionEvent::LocalClose);
        assert_eq!(state.lock().unwrap().cancels, 1);
    }
}
