//! HTTP authorization filter.
//!
//! One `Filter` is created per request. On request headers it builds an
//! attribute context, issues a check and holds the request until the check
//! completes:
//!
//! ```text
//! NotStarted ──decode_headers (route + cluster)──▶ Calling ──on_complete──▶ Complete
//!      │                                              │
//!      └── no route or cluster: pass through          └──on_destroy (cancel)──▶ Complete
//! ```
//!
//! The client may complete inside `check`. The filter tracks that with
//! `initiating_call`: an inline completion never resumes the pipeline itself,
//! because `decode_headers` is still on the stack and reports the outcome
//! through its return value.
//!
//! The configured authorization cluster must be known to the
//! [`ClusterManager`]. When it is not, no check is sent and the request is
//! handled as a failed check under the fail-open/closed policy.

use std::sync::Arc;

use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::attributes::AttributeContext;
use crate::client::{CheckRequest, CheckResult, CheckStatus, Client, Completion, PendingCheck};
use crate::config::FilterConfig;
use crate::connection::ResponseFlag;
use crate::decision::Decision;
use crate::pipeline::{
    ClusterInfo, ClusterManager, DecoderFilterCallbacks, FilterDataStatus, FilterHeadersStatus,
    FilterTrailersStatus,
};
use crate::stats::{AuthzStats, StatsEvent};

/// Lifecycle of the filter. `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Calling,
    Complete,
}

/// Whether the request may move past this filter once the check is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterReturn {
    ContinueDecoding,
    StopDecoding,
}

/// Per-request external authorization filter.
pub struct Filter {
    config: Arc<FilterConfig>,
    client: Box<dyn Client>,
    cluster_manager: Arc<dyn ClusterManager>,
    stats: Arc<dyn AuthzStats>,
    state: State,
    filter_return: FilterReturn,
    pending: Option<PendingCheck>,
    cluster: Option<Arc<ClusterInfo>>,
    /// Set only while `client.check` is on the stack.
    initiating_call: bool,
}

impl Filter {
    pub fn new(
        config: Arc<FilterConfig>,
        client: Box<dyn Client>,
        cluster_manager: Arc<dyn ClusterManager>,
        stats: Arc<dyn AuthzStats>,
    ) -> Self {
        Self {
            config,
            client,
            cluster_manager,
            stats,
            state: State::NotStarted,
            filter_return: FilterReturn::ContinueDecoding,
            pending: None,
            cluster: None,
            initiating_call: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    // ========================================================================
    // Pipeline entry points
    // ========================================================================

    /// Starts authorization for the request described by `head`.
    ///
    /// Returns `StopIteration` while the check is outstanding and after an
    /// inline deny. An inline allow has already merged its headers into
    /// `head` and returns `Continue`.
    pub fn decode_headers(
        &mut self,
        callbacks: &mut dyn DecoderFilterCallbacks,
        head: &mut Parts,
        _end_stream: bool,
    ) -> FilterHeadersStatus {
        self.initiate_call(callbacks, head);
        if self.state == State::Calling || self.filter_return == FilterReturn::StopDecoding {
            FilterHeadersStatus::StopIteration
        } else {
            FilterHeadersStatus::Continue
        }
    }

    /// Body chunks are held under backpressure while the check runs.
    pub fn decode_data(&mut self, _end_stream: bool) -> FilterDataStatus {
        if self.state == State::Calling {
            FilterDataStatus::StopIterationAndWatermark
        } else {
            FilterDataStatus::Continue
        }
    }

    pub fn decode_trailers(&mut self) -> FilterTrailersStatus {
        if self.state == State::Calling {
            FilterTrailersStatus::StopIteration
        } else {
            FilterTrailersStatus::Continue
        }
    }

    /// Tears the filter down. An outstanding check is cancelled and its
    /// result can no longer reach the filter.
    pub fn on_destroy(&mut self) {
        if self.state == State::Calling {
            debug!("request destroyed with a check outstanding, cancelling");
            self.state = State::Complete;
            self.client.cancel();
            self.pending = None;
        }
    }

    /// Waits for a deferred completion and applies it. Returns immediately
    /// when no check is outstanding.
    ///
    /// Cancel-safe: dropping the future leaves the check outstanding.
    pub async fn wait_for_completion(&mut self, callbacks: &mut dyn DecoderFilterCallbacks) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let result = pending.wait().await;
        self.on_complete(callbacks, result);
    }

    /// Applies a deferred check result.
    ///
    /// # Panics
    ///
    /// If the filter is not `Calling`, for example on a second completion.
    pub fn on_complete(&mut self, callbacks: &mut dyn DecoderFilterCallbacks, result: CheckResult) {
        self.complete(callbacks, result, None);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn initiate_call(&mut self, callbacks: &mut dyn DecoderFilterCallbacks, head: &mut Parts) {
        if self.state != State::NotStarted {
            return;
        }

        let Some(route) = callbacks.route() else {
            debug!("no route, skipping authorization");
            return;
        };
        let Some(cluster) = self.cluster_manager.get(&route.cluster_name) else {
            debug!(cluster = %route.cluster_name, "unknown cluster, skipping authorization");
            return;
        };
        self.cluster = Some(cluster);

        self.state = State::Calling;
        self.initiating_call = true;

        // An authorization cluster the proxy does not know is a failed check.
        if self.cluster_manager.get(self.config.cluster()).is_none() {
            warn!(authz_cluster = %self.config.cluster(), "authorization cluster not found");
            self.complete(callbacks, CheckResult::error(), Some(&mut head.headers));
            self.initiating_call = false;
            return;
        }

        let attributes = AttributeContext::for_http(
            callbacks.connection(),
            callbacks.stream_id(),
            callbacks.stream_info(),
            head,
        );
        let (completion, mut pending) = Completion::channel();
        self.client.check(
            CheckRequest::new(attributes),
            completion,
            &callbacks.active_span(),
        );
        match pending.try_take() {
            Some(result) => self.complete(callbacks, result, Some(&mut head.headers)),
            None => self.pending = Some(pending),
        }
        self.initiating_call = false;
    }

    /// `inline_headers` is the request head still owned by `decode_headers`;
    /// deferred completions reach the held headers through the callbacks.
    fn complete(
        &mut self,
        callbacks: &mut dyn DecoderFilterCallbacks,
        result: CheckResult,
        inline_headers: Option<&mut HeaderMap>,
    ) {
        assert_eq!(
            self.state,
            State::Calling,
            "check completion delivered to a filter that is not calling"
        );
        self.state = State::Complete;
        self.pending = None;

        let target = self
            .cluster
            .as_ref()
            .map(|cluster| cluster.name.clone())
            .unwrap_or_default();
        let event = match result.status() {
            CheckStatus::Ok => StatsEvent::Ok,
            CheckStatus::Denied => StatsEvent::Denied,
            CheckStatus::Error => StatsEvent::Error,
        };
        self.stats.record(&target, event);

        match Decision::evaluate(&self.config, result) {
            Decision::Continue {
                upstream_headers,
                failure_mode_allowed,
            } => {
                if failure_mode_allowed {
                    warn!(cluster = %target, "authorization service failed, allowing request");
                    self.stats.record(&target, StatsEvent::FailureModeAllowed);
                }

                // Headers land before the pipeline resumes.
                match inline_headers {
                    Some(headers) => merge(headers, upstream_headers),
                    None => match callbacks.request_headers() {
                        Some(headers) => merge(headers, upstream_headers),
                        None if !upstream_headers.is_empty() => {
                            warn!("request headers are gone, dropping authorization headers");
                        }
                        None => {}
                    },
                }

                if !self.initiating_call {
                    callbacks.continue_decoding();
                }
            }
            Decision::Deny(reply) => {
                debug!(cluster = %target, status = reply.status.as_u16(), "request denied");
                self.filter_return = FilterReturn::StopDecoding;
                callbacks
                    .stream_info_mut()
                    .set_response_flag(ResponseFlag::UnauthorizedExternalService);

                let (response, body) = reply.into_response();
                match body {
                    Some(body) => {
                        callbacks.encode_headers(response, false);
                        callbacks.encode_data(body, true);
                    }
                    None => callbacks.encode_headers(response, true),
                }
            }
        }
    }
}

fn merge(headers: &mut HeaderMap, additions: Vec<(HeaderName, HeaderValue)>) {
    for (name, value) in additions {
        headers.append(name, value);
    }
}
