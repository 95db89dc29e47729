//! Request-scoped hardening settings
//!
//! A `HardeningSettings` snapshot is loaded from the option store once per
//! request and handed to every filter. The free-text list options are parsed
//! here, so filters only ever see trimmed, non-empty entries.

use crate::options::{self, OptionStore, OptionValue};

/// Query parameters that belong to core, e-commerce and page-builder
/// functionality. A request carrying any of them keeps its query string.
pub const RESERVED_QUERY_PARAMS: &[&str] = &[
    "preview",
    "p",
    "page_id",
    "post_type",
    "preview_id",
    "preview_nonce",
    "tb",
    "replytocom",
    "unapproved",
    "moderation-hash",
    "s",
    "paged",
    "cat",
    "tag",
    "author",
    "year",
    "monthnum",
    "day",
    "feed",
    "withcomments",
    "withoutcomments",
    "attachment_id",
    "subpage",
    "static",
    "customize_theme",
    "customize_changeset_uuid",
    "customize_autosaved",
    "wp_customize",
    "doing_wp_cron",
    "rest_route",
    // WooCommerce
    "wc-ajax",
    "add-to-cart",
    "remove_item",
    "undo_item",
    "update_cart",
    "proceed",
    "elementor-preview",
    // asset versions
    "ver",
    "v",
    // nonce and login flow
    "_wpnonce",
    "action",
    "redirect_to",
    "loggedout",
    "registration",
    "checkemail",
    "key",
    "login",
    "interim-login",
    "customize_messenger_channel",
    // page builders
    "fl_builder",
    "et_fb",
    "ct_builder",
    "tve",
    "vcv-action",
    "vc_action",
    "brizy-edit",
    "brizy-edit-iframe",
];

pub fn is_reserved_param(name: &str) -> bool {
    RESERVED_QUERY_PARAMS.contains(&name)
}

/// Split newline-delimited option text into trimmed, non-empty lines
pub fn parse_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(str::trim).filter(|line| !line.is_empty())
}

/// One entry of the excluded-path list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// `?param` form: any request carrying `param` keeps its query string
    Param(String),
    /// `path[?query]` form
    Path {
        /// Path with leading and trailing slashes removed
        path: String,
        /// Exact raw query that must match, if any
        query: Option<String>,
    },
}

impl Exclusion {
    pub fn parse(line: &str) -> Self {
        if line.starts_with('?') {
            return Exclusion::Param(line.trim_matches(|c| c == '?' || c == '=').to_string());
        }

        let without_fragment = line.split('#').next().unwrap_or(line);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };

        Exclusion::Path {
            path: path.trim_matches('/').to_string(),
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
        }
    }
}

/// Operator-entered exclusions, in entry order
///
/// The trimmed lines are kept as entered for substring matching against the
/// request URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedPaths {
    entries: Vec<Exclusion>,
    raw: Vec<String>,
}

impl ExcludedPaths {
    pub fn parse(text: &str) -> Self {
        let raw: Vec<String> = parse_lines(text).map(str::to_string).collect();
        let entries = raw.iter().map(|line| Exclusion::parse(line)).collect();
        Self { entries, raw }
    }

    pub fn entries(&self) -> &[Exclusion] {
        &self.entries
    }

    /// True when `request_uri` contains any entry verbatim
    pub fn contained_in(&self, request_uri: &str) -> bool {
        self.raw.iter().any(|entry| request_uri.contains(entry.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Raw substrings that get a request rejected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockedPatterns {
    patterns: Vec<String>,
}

impl BlockedPatterns {
    pub fn parse(text: &str) -> Self {
        Self {
            patterns: parse_lines(text).map(str::to_string).collect(),
        }
    }

    /// First pattern contained in `request_uri`
    pub fn find_in(&self, request_uri: &str) -> Option<&str> {
        self.patterns
            .iter()
            .map(String::as_str)
            .find(|pattern| request_uri.contains(pattern))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Path prefixes allowed to serve `.php` files directly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedPhpPaths {
    prefixes: Vec<String>,
}

impl ExcludedPhpPaths {
    pub fn parse(text: &str) -> Self {
        Self {
            prefixes: parse_lines(text)
                .map(|line| line.trim_matches('/'))
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// `path` must already have its leading and trailing slashes trimmed
    pub fn permits(&self, trimmed_path: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| trimmed_path.starts_with(prefix.as_str()))
    }
}

/// Immutable configuration snapshot for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardeningSettings {
    pub remove_query_strings: bool,
    pub remove_feeds: bool,
    pub remove_oembed: bool,
    pub remove_pingback: bool,
    pub remove_wp_json: bool,
    pub remove_rsd: bool,
    pub remove_wp_generator: bool,
    pub excluded_paths: ExcludedPaths,
    pub blocked_patterns: BlockedPatterns,
    pub excluded_php_paths: ExcludedPhpPaths,
}

impl HardeningSettings {
    /// Load a snapshot with one batched read
    ///
    /// Store failures never fail the request: the options read as absent,
    /// which means "feature disabled" or an empty list.
    pub async fn load(store: &dyn OptionStore) -> Self {
        let values = match store.get_many(&SNAPSHOT_KEYS).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "Option read failed, treating as unset");
                Vec::new()
            }
        };

        let value = |key: &str| {
            SNAPSHOT_KEYS
                .iter()
                .position(|k| *k == key)
                .and_then(|i| values.get(i))
                .and_then(Option::as_ref)
        };
        let flag = |key: &str| value(key).is_some_and(OptionValue::as_bool);
        let text = |key: &str| value(key).map(OptionValue::as_text).unwrap_or_default();

        Self {
            remove_query_strings: flag(options::REMOVE_QUERY_STRINGS),
            remove_feeds: flag(options::REMOVE_FEEDS),
            remove_oembed: flag(options::REMOVE_OEMBED),
            remove_pingback: flag(options::REMOVE_PINGBACK),
            remove_wp_json: flag(options::REMOVE_WP_JSON),
            remove_rsd: flag(options::REMOVE_RSD),
            remove_wp_generator: flag(options::REMOVE_WP_GENERATOR),
            excluded_paths: ExcludedPaths::parse(&text(options::EXCLUDED_PATHS)),
            blocked_patterns: BlockedPatterns::parse(&text(options::BLOCKED_PATTERNS)),
            excluded_php_paths: ExcludedPhpPaths::parse(&text(options::EXCLUDED_PHP_PATHS)),
        }
    }
}

const SNAPSHOT_KEYS: [&str; 10] = [
    options::REMOVE_QUERY_STRINGS,
    options::REMOVE_FEEDS,
    options::REMOVE_OEMBED,
    options::REMOVE_PINGBACK,
    options::REMOVE_WP_JSON,
    options::REMOVE_RSD,
    options::REMOVE_WP_GENERATOR,
    options::EXCLUDED_PATHS,
    options::BLOCKED_PATTERNS,
    options::EXCLUDED_PHP_PATHS,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::InMemoryOptionStore;

    #[test]
    fn test_parse_lines_trims_and_drops_empty() {
        let lines: Vec<&str> = parse_lines("  /a/ \r\n\n\t\n/b\n").collect();
        assert_eq!(lines, vec!["/a/", "/b"]);
    }

    #[test]
    fn test_exclusion_param_form() {
        assert_eq!(Exclusion::parse("?ref="), Exclusion::Param("ref".to_string()));
        assert_eq!(Exclusion::parse("??utm"), Exclusion::Param("utm".to_string()));
    }

    #[test]
    fn test_exclusion_path_form() {
        assert_eq!(
            Exclusion::parse("/register/?action=check_email"),
            Exclusion::Path {
                path: "register".to_string(),
                query: Some("action=check_email".to_string()),
            }
        );
        assert_eq!(
            Exclusion::parse("/shop/"),
            Exclusion::Path {
                path: "shop".to_string(),
                query: None,
            }
        );
        assert_eq!(
            Exclusion::parse("/shop/?"),
            Exclusion::Path {
                path: "shop".to_string(),
                query: None,
            }
        );
    }

    #[test]
    fn test_excluded_paths_substring() {
        let paths = ExcludedPaths::parse("/checkout/\n\n?token\n");
        assert_eq!(paths.entries().len(), 2);
        assert!(paths.contained_in("/checkout/step?x=%3C"));
        assert!(paths.contained_in("/page?token=1"));
        assert!(!paths.contained_in("/cart/"));
    }

    #[test]
    fn test_blocked_patterns_first_match() {
        let patterns = BlockedPatterns::parse("%3C\n \nunion select\n");
        assert_eq!(patterns.find_in("/?q=%3Cscript"), Some("%3C"));
        assert_eq!(patterns.find_in("/clean"), None);
        assert!(BlockedPatterns::parse("\n  \n").is_empty());
    }

    #[test]
    fn test_excluded_php_paths_drop_slash_only_entries() {
        let php = ExcludedPhpPaths::parse("/wp-login.php\n/\nwp-content/plugins/\n");
        assert!(php.permits("wp-login.php"));
        assert!(php.permits("wp-content/plugins/form/submit.php"));
        assert!(!php.permits("secret.php"));
        assert!(!ExcludedPhpPaths::parse("/\n//").permits("anything.php"));
    }

    #[test]
    fn test_reserved_params() {
        for name in ["s", "paged", "preview", "_wpnonce", "wc-ajax", "brizy-edit-iframe"] {
            assert!(is_reserved_param(name), "{} should be reserved", name);
        }
        assert!(!is_reserved_param("utm_source"));
        assert_eq!(RESERVED_QUERY_PARAMS.len(), 57);
    }

    #[tokio::test]
    async fn test_load_defaults_to_disabled() {
        let store = InMemoryOptionStore::new();
        let settings = HardeningSettings::load(&store).await;
        assert_eq!(settings, HardeningSettings::default());
    }

    #[tokio::test]
    async fn test_load_reads_all_options() {
        let store = InMemoryOptionStore::with_options([
            (options::REMOVE_QUERY_STRINGS, OptionValue::Bool(true)),
            (options::REMOVE_RSD, OptionValue::from("1")),
            (options::REMOVE_FEEDS, OptionValue::from("nonsense")),
            (options::EXCLUDED_PATHS, OptionValue::from("/a/\n?b")),
            (options::BLOCKED_PATTERNS, OptionValue::from("%3C")),
            (options::EXCLUDED_PHP_PATHS, OptionValue::from("wp-login.php")),
        ]);

        let settings = HardeningSettings::load(&store).await;
        assert!(settings.remove_query_strings);
        assert!(settings.remove_rsd);
        assert!(!settings.remove_feeds);
        assert_eq!(settings.excluded_paths.entries().len(), 2);
        assert_eq!(settings.blocked_patterns.find_in("/%3C"), Some("%3C"));
        assert!(settings.excluded_php_paths.permits("wp-login.php"));
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl OptionStore for FailingStore {
        async fn get(&self, key: &str) -> options::Result<Option<OptionValue>> {
            Err(options::OptionsError::Io {
                path: key.into(),
                source: std::io::Error::other("store offline"),
            })
        }

        async fn set(&self, _key: &str, _value: OptionValue) -> options::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_survives_store_failure() {
        let settings = HardeningSettings::load(&FailingStore).await;
        assert_eq!(settings, HardeningSettings::default());
    }
}
