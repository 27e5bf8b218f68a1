//! Interfaces between the HTTP filter and the request pipeline that hosts it.
//!
//! The pipeline owns the stream. It calls into the filter with the request
//! headers, body and trailers, and the filter talks back through
//! [`DecoderFilterCallbacks`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Response};
use tracing::Span;

use crate::connection::{ConnectionInfo, StreamInfo};

/// Returned from `decode_headers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    /// Pass headers to the next filter.
    Continue,
    /// Hold headers here until the filter resumes the stream.
    StopIteration,
}

/// Returned from `decode_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDataStatus {
    /// Pass data to the next filter.
    Continue,
    /// Keep accepting data under flow-control backpressure without passing
    /// it on.
    StopIterationAndWatermark,
}

/// Returned from `decode_trailers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTrailersStatus {
    Continue,
    StopIteration,
}

/// Route selected for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Upstream cluster the route targets
    pub cluster_name: String,
}

impl RouteEntry {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }
}

/// A known upstream cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
}

/// Resolves cluster names to live clusters.
pub trait ClusterManager: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<ClusterInfo>>;
}

/// Fixed set of clusters.
#[derive(Debug, Clone, Default)]
pub struct StaticClusterManager {
    clusters: HashMap<String, Arc<ClusterInfo>>,
}

impl StaticClusterManager {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let clusters = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), Arc::new(ClusterInfo { name }))
            })
            .collect();
        Self { clusters }
    }
}

impl ClusterManager for StaticClusterManager {
    fn get(&self, name: &str) -> Option<Arc<ClusterInfo>> {
        self.clusters.get(name).cloned()
    }
}

/// What the HTTP filter can see of, and do to, its stream.
pub trait DecoderFilterCallbacks: Send {
    /// Identifier of this stream, unique per connection.
    fn stream_id(&self) -> u64;

    fn connection(&self) -> &ConnectionInfo;

    /// Route chosen for the request, if any.
    fn route(&self) -> Option<&RouteEntry>;

    fn stream_info(&self) -> &StreamInfo;

    fn stream_info_mut(&mut self) -> &mut StreamInfo;

    /// Span of the request; checks are traced as its children.
    fn active_span(&self) -> Span;

    /// The request headers held by the pipeline while iteration is stopped.
    fn request_headers(&mut self) -> Option<&mut HeaderMap>;

    /// Resumes iteration after the filter returned a stop status.
    fn continue_decoding(&mut self);

    /// Sends a local response downstream. `end_stream` is `false` when a
    /// body follows.
    fn encode_headers(&mut self, response: Response<()>, end_stream: bool);

    fn encode_data(&mut self, data: Bytes, end_stream: bool);
}
