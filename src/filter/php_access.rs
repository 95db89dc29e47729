//! Direct PHP access gate
//!
//! Non-admin requests for a `.php` path are rejected unless the path starts
//! with an operator-permitted prefix. Both checks run on the normalized path,
//! so percent-encoded or dotted spellings of a script name are caught.

use crate::context::RequestContext;
use crate::filter::{Filter, FilterAction};
use crate::settings::HardeningSettings;

pub const FORBIDDEN_MESSAGE: &str = "403 Forbidden";

pub struct PhpAccessFilter;

fn is_php_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".php")
}

impl Filter for PhpAccessFilter {
    fn filter(&self, ctx: &RequestContext, settings: &HardeningSettings) -> FilterAction {
        if ctx.is_admin || !is_php_path(&ctx.normalized_path) {
            return FilterAction::Allow;
        }

        if settings.excluded_php_paths.permits(ctx.trimmed_normalized_path()) {
            return FilterAction::Allow;
        }

        tracing::warn!(path = %ctx.path, "Direct PHP access blocked");
        FilterAction::forbidden(FORBIDDEN_MESSAGE)
    }

    fn name(&self) -> &str {
        "php_access"
    }
}
