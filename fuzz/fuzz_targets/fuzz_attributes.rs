#![no_main]

//! Fuzz target for attribute context building.
//!
//! Splits the input into a path and header lines; whatever `http` accepts
//! must build a context without panicking.

use ext_authz::attributes::AttributeContext;
use ext_authz::connection::{ConnectionInfo, StreamInfo};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.lines();
    let Some(uri) = lines.next() else {
        return;
    };

    let mut builder = http::Request::builder().uri(uri);
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            builder = builder.header(name.trim(), value.trim());
        }
    }
    let Ok(request) = builder.body(()) else {
        return;
    };
    let (head, _) = request.into_parts();

    let connection = ConnectionInfo::new(
        "127.0.0.1:8080".parse().unwrap(),
        "127.0.0.1:50000".parse().unwrap(),
    );
    let ctx = AttributeContext::for_http(&connection, 1, &StreamInfo::default(), &head);
    assert_eq!(ctx.request.headers.get(":method").map(String::as_str), Some("GET"));
});
