//! Blocked-pattern gate
//!
//! Rejects non-admin requests whose raw URI contains a configured pattern.
//! A URI containing any excluded-path entry skips the check entirely.

use crate::context::RequestContext;
use crate::filter::{Filter, FilterAction};
use crate::settings::HardeningSettings;

pub const BLOCKED_MESSAGE: &str = "Security Error: Blocked Pattern Detected";

pub struct UrlSecurityFilter;

impl Filter for UrlSecurityFilter {
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        if ctx.is_admin || settings.blocked_patterns.is_empty() {
            return FilterAction::Allow;
        }

        if settings.excluded_paths.contained_in(&ctx.request_uri) {
            return FilterAction::Allow;
        }

        match settings.blocked_patterns.find_in(&ctx.request_uri) {
            Some(pattern) => {
                tracing::warn!(uri = %ctx.request_uri, pattern, "Blocked pattern matched");
                FilterAction::forbidden(BLOCKED_MESSAGE)
            }
            None => FilterAction::Allow,
        }
    }

    fn name(&self) -> &str {
        "url_security"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BlockedPatterns, ExcludedPaths};

    fn settings(patterns: &str, excluded: &str) -> HardeningSettings {
        HardeningSettings {
            blocked_patterns: BlockedPatterns::parse(patterns),
            excluded_paths: ExcludedPaths::parse(excluded),
            ..Default::default()
        }
    }

    #[test]
    fn test_blocks_matching_pattern() {
        let settings = settings("%3C\nwp-config", "");
        let ctx = RequestContext::for_target("/search/?q=%3Cscript%3E");
        assert_eq!(
            UrlSecurityFilter.filter(&ctx, &settings),
            FilterAction::forbidden(BLOCKED_MESSAGE)
        );

        let ctx = RequestContext::for_target("/wp-config.php.bak");
        assert_eq!(
            UrlSecurityFilter.filter(&ctx, &settings),
            FilterAction::forbidden(BLOCKED_MESSAGE)
        );
    }

    #[test]
    fn test_allows_clean_uri() {
        let settings = settings("%3C", "");
        let ctx = RequestContext::for_target("/about/");
        assert_eq!(UrlSecurityFilter.filter(&ctx, &settings), FilterAction::Allow);
    }

    #[test]
    fn test_excluded_path_skips_check() {
        let settings = settings("%3C", "/editor/");
        let ctx = RequestContext::for_target("/editor/?body=%3Cp%3E");
        assert_eq!(UrlSecurityFilter.filter(&ctx, &settings), FilterAction::Allow);
    }

    #[test]
    fn test_admin_is_exempt() {
        let settings = settings("%3C", "");
        let ctx = RequestContext::for_target("/wp-admin/post.php?content=%3Cb%3E");
        assert_eq!(UrlSecurityFilter.filter(&ctx, &settings), FilterAction::Allow);
    }

    #[test]
    fn test_blank_lines_never_match() {
        let settings = settings("\n   \n", "");
        let ctx = RequestContext::for_target("/anything");
        assert_eq!(UrlSecurityFilter.filter(&ctx, &settings), FilterAction::Allow);
    }
}
