//! Endpoint derivation.
//!
//! Priority: explicit `url`, else `ws(s)://host:port/path` built from the page
//! origin. Sandboxed hosting environments and localhost always get plain
//! `ws://`; otherwise the scheme follows the page (`wss://` for https pages).

use crate::{ClientConfig, ClientError};
use url::Url;

/// Host suffixes of browser sandboxes/containers that cannot terminate TLS
/// for the backend port.
const SANDBOX_HOSTS: &[&str] = &[
    "webcontainer.io",
    "webcontainer-api.io",
    "stackblitz.io",
    "csb.app",
    "codesandbox.io",
    "gitpod.io",
];

pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]") || host.ends_with(".localhost")
}

pub fn is_sandboxed_host(host: &str) -> bool {
    SANDBOX_HOSTS
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
}

pub fn scheme_for(host: &str, secure: bool) -> &'static str {
    if is_local_host(host) || is_sandboxed_host(host) {
        "ws"
    } else if secure {
        "wss"
    } else {
        "ws"
    }
}

/// Build the URL the channel connects to.
pub fn resolve(config: &ClientConfig) -> Result<Url, ClientError> {
    let url = match &config.url {
        Some(explicit) => Url::parse(explicit)?,
        None => {
            let host = &config.host;
            let scheme = scheme_for(host, config.secure);
            let host = if host.contains(':') && !host.starts_with('[') {
                format!("[{host}]")
            } else {
                host.clone()
            };
            let path = if config.path.starts_with('/') {
                config.path.clone()
            } else {
                format!("/{}", config.path)
            };
            Url::parse(&format!("{scheme}://{host}:{}{path}", config.port))?
        }
    };
    Ok(with_token(url, config.token.as_deref()))
}

/// Append `token` unless the URL already carries a query string.
fn with_token(mut url: Url, token: Option<&str>) -> Url {
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        if url.query().is_none() {
            url.query_pairs_mut().append_pair("token", token);
        }
    }
    url
}
