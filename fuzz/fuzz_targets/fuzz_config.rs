#![no_main]

//! Fuzz target for the YAML policy loader.
//!
//! Arbitrary input must yield either a validated config or a `ConfigError`,
//! never a panic.

use ext_authz::config::{FilterConfig, TcpFilterConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = FilterConfig::from_yaml(yaml) {
        // Validated configs always carry a target cluster.
        assert!(!config.cluster().is_empty());
        let _ = config.allowed_client_headers().allows_str("Authorization");
    }
    let _ = TcpFilterConfig::from_yaml(yaml);
});
