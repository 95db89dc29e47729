//! Feed disabling
//!
//! With feeds removed, every feed endpoint answers with a terminal message
//! instead of the feed body. Applies to administrators as well.

use crate::context::RequestContext;
use crate::filter::{Filter, FilterAction};
use crate::settings::HardeningSettings;

pub const FEEDS_DISABLED_MESSAGE: &str = "RSS Feeds are disabled for security reasons.";

const FEED_TYPES: &[&str] = &["rdf", "rss", "rss2", "atom"];

const LEGACY_FEED_SCRIPTS: &[&str] = &[
    "wp-rss.php",
    "wp-rss2.php",
    "wp-atom.php",
    "wp-rdf.php",
    "wp-commentsrss2.php",
    "wp-feed.php",
];

pub struct FeedFilter;

/// Pretty-permalink feeds (`.../feed/`, `.../feed/atom/`), `?feed=` queries
/// and the legacy feed scripts
pub fn is_feed_request(ctx: &RequestContext) -> bool {
    let segments: Vec<&str> = ctx
        .normalized_path
        .split('/').filter(|s| !s.is_empty()).collect();

    let pretty = match segments.as_slice() {
        [.., last] if last.eq_ignore_ascii_case("feed") => true,
        [.., feed, kind] => {
            feed.eq_ignore_ascii_case("feed")
                && FEED_TYPES.iter().any(|t| kind.eq_ignore_ascii_case(t))
        }
        _ => false,
    };

    let legacy = segments.last().is_some_and(|last| {
        LEGACY_FEED_SCRIPTS
            .iter()
            .any(|script| last.eq_ignore_ascii_case(script))
    });

    pretty || legacy || ctx.has_query_key("feed")
}

impl Filter for FeedFilter {
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        if settings.remove_feeds && is_feed_request(ctx) {
            return FilterAction::forbidden(FEEDS_DISABLED_MESSAGE);
        }
        FilterAction::Allow
    }

    fn name(&self) -> &str {
        "feeds"
    }
}
