//! Mock authorization service for manual end-to-end runs.
//!
//! Answers every check at `<path_prefix><original path>`:
//! - `200` with `x-authz-user` for paths outside `--deny-prefix`
//! - `401` with `www-authenticate`, `x-reason` and a text body otherwise

use std::net::SocketAddr;

use axum::Router;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use clap::Parser;
use ext_authz::logging::{LogFormat, init_logging};

#[derive(Debug, Parser)]
#[command(name = "mock_authz", about = "Mock external authorization service")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "MOCK_AUTHZ_LISTEN", default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    /// Requests whose path starts with this prefix are denied
    #[arg(long, env = "MOCK_AUTHZ_DENY_PREFIX", default_value = "/deny")]
    deny_prefix: String,

    /// Log format: pretty or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    let deny_prefix = args.deny_prefix.clone();
    let app = Router::new().fallback(move |uri: Uri| {
        let deny_prefix = deny_prefix.clone();
        async move { check(&deny_prefix, &uri) }
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await.map_err(|e| {
        tracing::error!(addr = %args.listen, error = %e, "failed to bind");
        e
    })?;
    tracing::info!(addr = %args.listen, deny_prefix = %args.deny_prefix, "mock authorization service listening");

    axum::serve(listener, app).await?;
    Ok(())
}

fn check(deny_prefix: &str, uri: &Uri) -> axum::response::Response {
    let path = uri.path();
    if path.starts_with(deny_prefix) {
        tracing::info!(path, "denying");
        return (
            StatusCode::UNAUTHORIZED,
            [
                ("www-authenticate", "Bearer realm=\"mock\""),
                ("x-reason", "path is denied"),
            ],
            "access denied by mock authorization service\n",
        )
            .into_response();
    }

    tracing::info!(path, "allowing");
    (StatusCode::OK, [("x-authz-user", "mock-user")]).into_response()
}
