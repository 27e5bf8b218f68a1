//! In-crate doubles for the filter collaborators.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, Response};
use tracing::Span;

use crate::client::{CheckRequest, CheckResult, Client, Completion};
use crate::connection::{ConnectionInfo, StreamInfo};
use crate::network::ReadFilterCallbacks;
use crate::pipeline::{DecoderFilterCallbacks, RouteEntry};
use crate::stats::{AuthzStats, StatsEvent};

pub fn connection() -> ConnectionInfo {
    ConnectionInfo::new(
        "10.0.0.1:8080".parse().unwrap(),
        "172.16.4.2:41000".parse().unwrap(),
    )
}

// ============================================================================
// Client
// ============================================================================

/// What a [`MockClient`] saw, shared with the test.
#[derive(Debug, Default)]
pub struct MockClientState {
    pub requests: Vec<CheckRequest>,
    pub cancels: usize,
    /// Completion of the last deferred check. Left in place on cancel so a
    /// test can fire it late.
    pub completion: Option<Completion>,
}

/// Client that answers inline with a fixed result, or defers.
pub struct MockClient {
    inline: Option<CheckResult>,
    outstanding: bool,
    state: Arc<Mutex<MockClientState>>,
}

impl MockClient {
    /// Completes every check before `check` returns.
    pub fn inline(result: CheckResult) -> (Self, Arc<Mutex<MockClientState>>) {
        Self::with_reply(Some(result))
    }

    /// Parks the completion in the shared state.
    pub fn deferred() -> (Self, Arc<Mutex<MockClientState>>) {
        Self::with_reply(None)
    }

    fn with_reply(inline: Option<CheckResult>) -> (Self, Arc<Mutex<MockClientState>>) {
        let state = Arc::new(Mutex::new(MockClientState::default()));
        let client = Self {
            inline,
            outstanding: false,
            state: state.clone(),
        };
        (client, state)
    }
}

impl Client for MockClient {
    fn check(&mut self, request: CheckRequest, completion: Completion, _parent_span: &Span) {
        assert!(!self.outstanding, "check() called while a previous check is still outstanding");
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        match &self.inline {
            Some(result) => completion.complete(result.clone()),
            None => {
                self.outstanding = true;
                state.completion = Some(completion);
            }
        }
    }

    fn cancel(&mut self) {
        assert!(self.outstanding, "cancel() called with no outstanding check");
        self.outstanding = false;
        self.state.lock().unwrap().cancels += 1;
    }
}

/// Fires the parked completion of a deferred [`MockClient`].
pub fn fire(state: &Arc<Mutex<MockClientState>>, result: CheckResult) {
    let completion = state
        .lock()
        .unwrap()
        .completion
        .take()
        .expect("no parked completion");
    completion.complete(result);
}

// ============================================================================
// Stats
// ============================================================================

/// Records every event in order.
#[derive(Debug, Default)]
pub struct CountingStats {
    events: Mutex<Vec<(String, StatsEvent)>>,
}

impl CountingStats {
    pub fn count(&self, event: StatsEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| *e == event)
            .count()
    }

    pub fn events(&self) -> Vec<(String, StatsEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl AuthzStats for CountingStats {
    fn record(&self, target: &str, event: StatsEvent) {
        self.events.lock().unwrap().push((target.to_string(), event));
    }
}

// ============================================================================
// HTTP pipeline
// ============================================================================

/// Pipeline double that records what the filter asked it to do.
pub struct MockCallbacks {
    pub connection: ConnectionInfo,
    pub route: Option<RouteEntry>,
    pub stream_info: StreamInfo,
    pub request_headers: HeaderMap,
    pub continue_calls: usize,
    pub encoded_headers: Vec<(Response<()>, bool)>,
    pub encoded_data: Vec<(Bytes, bool)>,
}

impl MockCallbacks {
    pub fn routed_to(cluster: &str) -> Self {
        Self {
            route: Some(RouteEntry::new(cluster)),
            ..Self::unrouted()
        }
    }

    pub fn unrouted() -> Self {
        Self {
            connection: connection(),
            route: None,
            stream_info: StreamInfo::default(),
            request_headers: HeaderMap::new(),
            continue_calls: 0,
            encoded_headers: Vec::new(),
            encoded_data: Vec::new(),
        }
    }
}

impl DecoderFilterCallbacks for MockCallbacks {
    fn stream_id(&self) -> u64 {
        1
    }

    fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    fn route(&self) -> Option<&RouteEntry> {
        self.route.as_ref()
    }

    fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    fn stream_info_mut(&mut self) -> &mut StreamInfo {
        &mut self.stream_info
    }

    fn active_span(&self) -> Span {
        Span::none()
    }

    fn request_headers(&mut self) -> Option<&mut HeaderMap> {
        Some(&mut self.request_headers)
    }

    fn continue_decoding(&mut self) {
        self.continue_calls += 1;
    }

    fn encode_headers(&mut self, response: Response<()>, end_stream: bool) {
        self.encoded_headers.push((response, end_stream));
    }

    fn encode_data(&mut self, data: Bytes, end_stream: bool) {
        self.encoded_data.push((data, end_stream));
    }
}

// ============================================================================
// TCP connection
// ============================================================================

/// Connection double for the network filter.
pub struct MockReadCallbacks {
    pub connection: ConnectionInfo,
    pub continue_calls: usize,
    pub closed: bool,
}

impl Default for MockReadCallbacks {
    fn default() -> Self {
        Self {
            connection: connection(),
            continue_calls: 0,
            closed: false,
        }
    }
}

impl ReadFilterCallbacks for MockReadCallbacks {
    fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    fn active_span(&self) -> Span {
        Span::none()
    }

    fn continue_reading(&mut self) {
        self.continue_calls += 1;
    }

    fn close_connection(&mut self) {
        self.closed = true;
    }
}
