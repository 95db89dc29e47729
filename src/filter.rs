//! Filter chain for request inspection
//!
//! Every filter is a pure decision over the request context and the
//! request's settings snapshot. Filters Allow, Redirect or Deny; the chain
//! stops at the first decision that is not Allow.

pub mod feeds;
pub mod php_access;
pub mod query_strings;
pub mod rest_api;
pub mod url_security;

pub use feeds::FeedFilter;
pub use php_access::PhpAccessFilter;
pub use query_strings::QueryStringFilter;
pub use rest_api::RestApiFilter;
pub use url_security::UrlSecurityFilter;

use std::fmt;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, HeaderName, HeaderValue, LOCATION};
use hyper::{Response, StatusCode};

use crate::context::RequestContext;
use crate::settings::HardeningSettings;

/// Action to take after filter inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Allow request to proceed
    Allow,
    /// Redirect the client and stop processing
    Redirect { status: u16, location: String },
    /// Reject with a terminal response
    Deny { status: u16, reason: String },
}

impl FilterAction {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        FilterAction::Deny {
            status: 403,
            reason: reason.into(),
        }
    }

    pub fn moved_permanently(location: impl Into<String>) -> Self {
        FilterAction::Redirect {
            status: 301,
            location: location.into(),
        }
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterAction::Allow => write!(f, "Allow"),
            FilterAction::Redirect { status, location } => {
                write!(f, "Redirect(status={}, location={})", status, location)
            }
            FilterAction::Deny { status, reason } => {
                write!(f, "Deny(status={}, reason={})", status, reason)
            }
        }
    }
}

/// Trait for request filters
pub trait Filter: Send + Sync {
    /// Inspect request and return action
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction;

    /// Filter name for logging
    fn name(&self) -> &str;
}

/// Chain of filters executed sequentially
///
/// First non-Allow action short-circuits the chain.
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// The hardening pipeline in request-lifecycle order
    pub fn hardening() -> Self {
        Self::new()
            .add_filter(Arc::new(UrlSecurityFilter))
            .add_filter(Arc::new(PhpAccessFilter))
            .add_filter(Arc::new(QueryStringFilter))
            .add_filter(Arc::new(FeedFilter))
            .add_filter(Arc::new(RestApiFilter))
    }

    pub fn add_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn execute(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        for filter in &self.filters {
            let action = filter.filter(ctx, settings);
            if action != FilterAction::Allow {
                tracing::info!(
                    filter = filter.name(),
                    action = %action,
                    uri = %ctx.request_uri,
                    "Filter stopped request"
                );
                return action;
            }
        }
        FilterAction::Allow
    }

    pub fn action_to_response(&self, action: FilterAction) -> Response<Full<Bytes>> {
        match action {
            FilterAction::Allow => Response::new(Full::new(Bytes::from("OK"))),
            FilterAction::Redirect { status, location } => redirect_response(status, &location),
            FilterAction::Deny { status, reason } => terminal_response(status, &reason),
        }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal rejection: status, no-cache headers, HTML content type and a
/// short message as the whole body
pub fn terminal_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);

    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status_code;

    let headers = response.headers_mut();
    let status_line = format!(
        "{} {}",
        status_code.as_u16(),
        status_code.canonical_reason().unwrap_or("")
    );
    if let Ok(value) = HeaderValue::from_str(status_line.trim_end()) {
        headers.insert(HeaderName::from_static("status"), value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, must-revalidate, max-age=0, no-store, private"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("Wed, 11 Jan 1984 05:00:00 GMT"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );

    response
}

pub fn redirect_response(status: u16, location: &str) -> Response<Full<Bytes>> {
    let status_code = StatusCode::from_u16(status)
        .ok()
        .filter(StatusCode::is_redirection)
        .unwrap_or(StatusCode::MOVED_PERMANENTLY);

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status_code;
    let location = HeaderValue::from_str(location).unwrap_or(HeaderValue::from_static("/"));
    response.headers_mut().insert(LOCATION, location);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_action_display() {
        assert_eq!(FilterAction::Allow.to_string(), "Allow");

        let deny = FilterAction::forbidden("Forbidden");
        assert_eq!(deny.to_string(), "Deny(status=403, reason=Forbidden)");

        let redirect = FilterAction::moved_permanently("/shop/");
        assert_eq!(redirect.to_string(), "Redirect(status=301, location=/shop/)");
    }

    #[test]
    fn test_action_to_response_deny() {
        let chain = FilterChain::new();
        let response = chain.action_to_response(FilterAction::forbidden("Access denied"));

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get("status").unwrap(), "403 Forbidden");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert!(
            response
                .headers()
                .get(CACHE_CONTROL)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("no-store")
        );
        assert!(response.headers().get(EXPIRES).is_some());
    }

    #[test]
    fn test_action_to_response_redirect() {
        let chain = FilterChain::new();
        let response = chain.action_to_response(FilterAction::moved_permanently("/register/"));

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/register/");
    }

    #[test]
    fn test_filter_chain_builder() {
        let chain = FilterChain::new()
            .add_filter(Arc::new(PhpAccessFilter))
            .add_filter(Arc::new(FeedFilter));

        assert_eq!(chain.filters.len(), 2);
        assert_eq!(chain.filter_names(), vec!["php_access", "feeds"]);
    }

    #[test]
    fn test_hardening_order() {
        assert_eq!(
            FilterChain::hardening().filter_names(),
            vec!["url_security", "php_access", "query_strings", "feeds", "rest_api"]
        );
    }

    #[test]
    fn test_blocked_pattern_wins_over_php_gate() {
        let settings = HardeningSettings {
            blocked_patterns: crate::settings::BlockedPatterns::parse("%3C"),
            ..Default::default()
        };
        let ctx = RequestContext::for_target("/secret.php?q=%3Cscript");

        let action = FilterChain::hardening().execute(&ctx, &settings);
        assert_eq!(
            action,
            FilterAction::forbidden(url_security::BLOCKED_MESSAGE)
        );
    }

    #[test]
    fn test_dot_segments_do_not_reach_admin_exemption() {
        let settings = HardeningSettings {
            blocked_patterns: crate::settings::BlockedPatterns::parse("%3C"),
            ..Default::default()
        };
        let chain = FilterChain::hardening();

        let uri: hyper::Uri = "/wp-admin/../secret.php?q=%3Cscript".parse().unwrap();
        let ctx = RequestContext::from_parts(&hyper::Method::GET, &uri, &hyper::HeaderMap::new());
        assert!(!ctx.is_admin);
        assert_eq!(
            chain.execute(&ctx, &settings),
            FilterAction::forbidden(url_security::BLOCKED_MESSAGE)
        );

        let ctx = RequestContext::for_target("/wp-admin/%2e%2e/secret.php");
        assert_eq!(
            chain.execute(&ctx, &HardeningSettings::default()),
            FilterAction::forbidden(php_access::FORBIDDEN_MESSAGE)
        );

        let ctx = RequestContext::for_target("/wp-admin/options.php");
        assert_eq!(
            chain.execute(&ctx, &HardeningSettings::default()),
            FilterAction::Allow
        );
    }

    #[test]
    fn test_empty_chain_allows() {
        let ctx = RequestContext::for_target("/anything.php");
        assert_eq!(
            FilterChain::new().execute(&ctx, &HardeningSettings::default()),
            FilterAction::Allow
        );
    }
}
