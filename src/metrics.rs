//! Process-wide prometheus registry.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Renders `registry` in the prometheus text format.
pub fn encode_text(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_else(|err| {
        error!(?err, "prometheus metrics are not valid utf8");
        String::new()
    })
}
