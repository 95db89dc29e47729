//! Query-string stripping
//!
//! Anonymous requests to public URLs are redirected (301) to the bare path
//! unless a reserved parameter or an operator exclusion keeps the query.

use crate::context::RequestContext;
use crate::filter::{Filter, FilterAction};
use crate::settings::{Exclusion, HardeningSettings, is_reserved_param};

pub struct QueryStringFilter;

impl QueryStringFilter {
    fn is_excluded(ctx: &RequestContext, keys: &[String], settings: &HardeningSettings) -> bool {
        let current_path = ctx.trimmed_path();
        let raw_query = ctx.query.as_deref().unwrap_or("");

        settings
            .excluded_paths
            .entries()
            .iter()
            .any(|exclusion| match exclusion {
                Exclusion::Param(name) => keys.iter().any(|key| key == name),
                // Raw string equality: reordered or re-encoded parameters do not match.
                Exclusion::Path { path, query } => {
                    current_path == path
                        && query.as_deref().is_none_or(|q| q == raw_query)
                }
            })
    }
}

impl Filter for QueryStringFilter {
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        if !settings.remove_query_strings || ctx.is_admin || ctx.is_logged_in {
            return FilterAction::Allow;
        }

        if ctx.query.is_none() {
            return FilterAction::Allow;
        }

        let keys = ctx.query_keys();
        if keys.iter().any(|key| is_reserved_param(key)) {
            return FilterAction::Allow;
        }

        if Self::is_excluded(ctx, &keys, settings) {
            return FilterAction::Allow;
        }

        if ctx.path == ctx.request_uri {
            return FilterAction::Allow;
        }

        tracing::debug!(uri = %ctx.request_uri, "Stripping query string");
        FilterAction::moved_permanently(ctx.path.clone())
    }

    fn name(&self) -> &str {
        "query_strings"
    }
}
