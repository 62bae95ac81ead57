//! `Host` header allow-list.
//!
//! Browsers will happily send requests to a LAN service from any web page
//! once an attacker's domain resolves to a LAN address (DNS rebinding).  The
//! browser still sends the attacker's name in `Host`, so refusing unknown
//! names closes that hole.  `localhost` and `127.0.0.1` are always allowed;
//! an empty list disables the check.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::handlers::ApiResponse;

const ALWAYS_ALLOWED: [&str; 2] = ["localhost", "127.0.0.1"];

/// Set of accepted host names (port stripped, case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    hosts: HashSet<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Whether a request carrying `Host: host_header` may proceed.
    pub fn permits(&self, host_header: Option<&str>) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        let Some(host) = host_header.map(strip_port) else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        ALWAYS_ALLOWED.contains(&host.as_str()) || self.hosts.contains(&host)
    }
}

/// `example.lan:8080` → `example.lan`, `[::1]:8080` → `[::1]`.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, _port)) => name,
        None => host,
    }
}

/// axum middleware enforcing the allow-list.
pub async fn host_filter(
    State(allow): State<Arc<HostAllowList>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.uri().host().map(str::to_owned));

    if !allow.permits(host.as_deref()) {
        warn!(host = host.as_deref().unwrap_or("<none>"), "request refused by host allow-list");
        return ApiResponse::error(StatusCode::FORBIDDEN, "host not allowed").into_response();
    }
    next.run(request).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_permits_everything() {
        let allow = HostAllowList::default();
        assert!(allow.permits(Some("evil.example:80")));
        assert!(allow.permits(None));
    }

    #[test]
    fn test_listed_host_is_permitted_with_or_without_port() {
        let allow = HostAllowList::new(["Wake.LAN"]);
        assert!(allow.permits(Some("wake.lan")));
        assert!(allow.permits(Some("WAKE.lan:8080")));
    }

    #[test]
    fn test_unlisted_host_is_refused() {
        let allow = HostAllowList::new(["wake.lan"]);
        assert!(!allow.permits(Some("rebind.attacker.example")));
        assert!(!allow.permits(None));
    }

    #[test]
    fn test_localhost_is_always_permitted() {
        let allow = HostAllowList::new(["wake.lan"]);
        assert!(allow.permits(Some("localhost:8080")));
        assert!(allow.permits(Some("127.0.0.1")));
    }

    #[test]
    fn test_strip_port_handles_ipv6_literals() {
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("10.0.0.1:80"), "10.0.0.1");
        assert_eq!(strip_port("wake.lan"), "wake.lan");
    }
}
