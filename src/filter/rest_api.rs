//! REST route disabling
//!
//! With the REST surface removed, anonymous visitors cannot reach `/wp-json`
//! routes or `?rest_route=` requests. Logged-in users keep access because the
//! block editor depends on it; JSONP is refused for everyone.
//!
//! Removing oEmbed also unregisters the oEmbed routes, independently of the
//! REST toggle; they answer like any unknown route.

use crate::context::RequestContext;
use crate::filter::{Filter, FilterAction};
use crate::settings::HardeningSettings;

pub const REST_DISABLED_MESSAGE: &str = "REST API is disabled.";
pub const JSONP_DISABLED_MESSAGE: &str = "JSONP support is disabled on this site.";
pub const NO_ROUTE_MESSAGE: &str = "No route was found matching the URL and request method.";

const REST_PREFIX: &str = "/wp-json";
const OEMBED_NAMESPACE: &str = "oembed";

pub struct RestApiFilter;

/// Route below `/wp-json`, if the normalized path is under it
fn pretty_route(ctx: &RequestContext) -> Option<&str> {
    ctx.normalized_path
        .strip_prefix(REST_PREFIX)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
}

pub fn is_rest_request(ctx: &RequestContext) -> bool {
    pretty_route(ctx).is_some() || ctx.has_query_key("rest_route")
}

fn in_oembed_namespace(route: &str) -> bool {
    route
        .trim_start_matches('/')
        .strip_prefix(OEMBED_NAMESPACE)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `/wp-json/oembed/...` or `?rest_route=/oembed/...`
pub fn is_oembed_route(ctx: &RequestContext) -> bool {
    pretty_route(ctx).is_some_and(in_oembed_namespace)
        || ctx
            .query_value("rest_route")
            .is_some_and(|route| in_oembed_namespace(&route))
}

impl Filter for RestApiFilter {
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        if settings.remove_oembed && is_oembed_route(ctx) {
            return FilterAction::Deny {
                status: 404,
                reason: NO_ROUTE_MESSAGE.to_string(),
            };
        }

        if !settings.remove_wp_json || ctx.is_admin || !is_rest_request(ctx) {
            return FilterAction::Allow;
        }

        if ctx.has_query_key("_jsonp") {
            return FilterAction::forbidden(JSONP_DISABLED_MESSAGE);
        }

        if ctx.is_logged_in {
            return FilterAction::Allow;
        }

        FilterAction::forbidden(REST_DISABLED_MESSAGE)
    }

    fn name(&self) -> &str {
        "rest_api"
    }
}
