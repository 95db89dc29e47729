//! Discovery-surface removal on upstream responses
//!
//! Each toggle is independent: it strips the advertisement of one surface
//! (feed links, oEmbed discovery, pingback, REST links, RSD, generator tags)
//! from response headers and text bodies, and is a no-op when disabled.

use hyper::HeaderMap;
use hyper::body::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LINK};
use hyper::http::response::Parts;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::settings::HardeningSettings;

const X_PINGBACK: &str = "x-pingback";

const REST_API_REL: &str = "https://api.w.org/";

static LINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<link\b[^>]*>[ \t]*\r?\n?").expect("valid regex"));
static META_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<meta\b[^>]*>[ \t]*\r?\n?").expect("valid regex"));
static EMBED_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*\bsrc\s*=\s*["'][^"']*/wp-embed(?:\.min)?\.js[^"']*["'][^>]*>\s*</script>[ \t]*\r?\n?"#,
    )
    .expect("valid regex")
});
static FEED_GENERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<generator\b[^>]*>.*?</generator>[ \t]*\r?\n?|<!--\s*generator=[^>]*-->[ \t]*\r?\n?")
        .expect("valid regex")
});
static PINGBACK_METHODS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<value>\s*<string>\s*pingback\.(?:ping|extensions\.getPingbacks)\s*</string>\s*</value>\s*",
    )
    .expect("valid regex")
});
static RSD_WP_API: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<api\b[^>]*\bname\s*=\s*["']WP-API["'][^>]*/?>[ \t]*\r?\n?"#)
        .expect("valid regex")
});
static LINK_HEADER_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>[^<]*").expect("valid regex"));

/// Value of an HTML attribute inside a single tag
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let mut from = 0;
    while let Some(idx) = lower[from..].find(name) {
        let start = from + idx;
        from = start + name.len();

        let preceded_ok = start == 0
            || lower.as_bytes()[start - 1].is_ascii_whitespace();
        if !preceded_ok {
            continue;
        }

        let rest = tag[from..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
                    .unwrap_or(rest.len());
                return Some(&rest[..end]);
            }
        };
        let value = &rest[1..];
        return value.find(quote).map(|end| &value[..end]);
    }
    None
}

fn attr_is(tag: &str, name: &str, expected: &str) -> bool {
    attr(tag, name).is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

fn rel_contains(tag: &str, token: &str) -> bool {
    attr(tag, "rel").is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|t| t.eq_ignore_ascii_case(token))
    })
}

/// Response rewriter built from a settings snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryRewriter {
    pub feeds: bool,
    pub oembed: bool,
    pub pingback: bool,
    pub rest: bool,
    pub rsd: bool,
    pub generator: bool,
}

impl DiscoveryRewriter {
    pub fn from_settings(settings: &HardeningSettings) -> Self {
        Self {
            feeds: settings.remove_feeds,
            oembed: settings.remove_oembed,
            pingback: settings.remove_pingback,
            rest: settings.remove_wp_json,
            rsd: settings.remove_rsd,
            generator: settings.remove_wp_generator,
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Rewrite headers and, for text content, the body of a buffered response
    pub fn rewrite(&self, parts: &mut Parts, body: Bytes) -> Bytes {
        if self.is_noop() {
            return body;
        }

        self.rewrite_headers(&mut parts.headers);

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !is_text_markup(content_type) {
            return body;
        }

        let Ok(text) = std::str::from_utf8(&body) else {
            return body;
        };

        match self.rewrite_body(text) {
            Some(rewritten) => {
                parts.headers.remove(CONTENT_LENGTH);
                Bytes::from(rewritten)
            }
            None => body,
        }
    }

    pub fn rewrite_headers(&self, headers: &mut HeaderMap) {
        if self.pingback {
            headers.remove(X_PINGBACK);
        }

        if self.rest && headers.contains_key(LINK) {
            let kept: Vec<HeaderValue> = headers
                .get_all(LINK)
                .iter()
                .filter_map(|value| {
                    let text = value.to_str().ok()?;
                    let remaining = strip_rest_link_values(text);
                    if remaining == text {
                        return Some(value.clone());
                    }
                    if remaining.is_empty() {
                        return None;
                    }
                    HeaderValue::from_str(&remaining).ok()
                })
                .collect();

            headers.remove(LINK);
            for value in kept {
                headers.append(LINK, value);
            }
        }
    }

    /// Returns the rewritten body, or `None` when nothing was removed
    pub fn rewrite_body(&self, body: &str) -> Option<String> {
        let mut out = LINK_TAG
            .replace_all(body, |caps: &Captures| {
                if self.strips_link(&caps[0]) {
                    String::new()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();

        if self.generator {
            out = META_TAG
                .replace_all(&out, |caps: &Captures| {
                    if attr_is(&caps[0], "name", "generator") {
                        String::new()
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned();
            out = FEED_GENERATOR.replace_all(&out, "").into_owned();
        }

        if self.oembed {
            out = EMBED_SCRIPT.replace_all(&out, "").into_owned();
        }

        if self.pingback && out.contains("<methodResponse") {
            out = PINGBACK_METHODS.replace_all(&out, "").into_owned();
        }

        if self.rest && out.contains("<rsd") {
            out = RSD_WP_API.replace_all(&out, "").into_owned();
        }

        (out != body).then_some(out)
    }

    fn strips_link(&self, tag: &str) -> bool {
        let link_type = attr(tag, "type").map(|t| t.trim().to_ascii_lowercase());
        let link_type = link_type.as_deref();

        if self.feeds
            && rel_contains(tag, "alternate")
            && matches!(link_type, Some("application/rss+xml" | "application/atom+xml"))
        {
            return true;
        }

        if self.oembed && matches!(link_type, Some("application/json+oembed" | "text/xml+oembed"))
        {
            return true;
        }

        if self.pingback && rel_contains(tag, "pingback") {
            return true;
        }

        if self.rest
            && (rel_contains(tag, REST_API_REL)
                || (rel_contains(tag, "alternate") && link_type == Some("application/json")))
        {
            return true;
        }

        self.rsd && (rel_contains(tag, "EditURI") || link_type == Some("application/rsd+xml"))
    }
}

fn is_text_markup(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("html") || ct.contains("xml")
}

/// Drop `rel="https://api.w.org/"` and JSON alternate entries from a Link
/// header value, keeping the rest in order
fn strip_rest_link_values(value: &str) -> String {
    LINK_HEADER_VALUE
        .find_iter(value)
        .map(|m| m.as_str().trim().trim_end_matches(',').trim())
        .filter(|entry| {
            let lower = entry.to_ascii_lowercase();
            let is_api = lower.contains(&format!("rel=\"{}\"", REST_API_REL));
            let is_json_alternate =
                lower.contains("rel=\"alternate\"") && lower.contains("type=\"application/json\"");
            !(is_api || is_json_alternate)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Response;

    const HEAD: &str = r#"<head>
<meta name="generator" content="WordPress 6.4.2" />
<meta charset="UTF-8">
<link rel="alternate" type="application/rss+xml" title="Site &raquo; Feed" href="https://example.com/feed/" />
<link rel="alternate" type="application/json+oembed" href="https://example.com/wp-json/oembed/1.0/embed?url=x" />
<link rel="alternate" type="text/xml+oembed" href="https://example.com/wp-json/oembed/1.0/embed?url=x&#038;format=xml" />
<link rel="pingback" href="https://example.com/xmlrpc.php">
<link rel="https://api.w.org/" href="https://example.com/wp-json/" />
<link rel="alternate" title="JSON" type="application/json" href="https://example.com/wp-json/wp/v2/pages/2" />
<link rel="EditURI" type="application/rsd+xml" title="RSD" href="https://example.com/xmlrpc.php?rsd" />
<link rel="stylesheet" href="https://example.com/style.css" />
<script src="https://example.com/wp-includes/js/wp-embed.min.js?ver=6.4" id="wp-embed-js"></script>
</head>"#;

    fn all() -> DiscoveryRewriter {
        DiscoveryRewriter {
            feeds: true,
            oembed: true,
            pingback: true,
            rest: true,
            rsd: true,
            generator: true,
        }
    }

    #[test]
    fn test_attr_parsing() {
        let tag = r#"<link REL='EditURI' type="application/rsd+xml" href=x>"#;
        assert_eq!(attr(tag, "rel"), Some("EditURI"));
        assert_eq!(attr(tag, "type"), Some("application/rsd+xml"));
        assert_eq!(attr(tag, "href"), Some("x"));
        assert_eq!(attr(r#"<link data-rel="x">"#, "rel"), None);
    }

    #[test]
    fn test_noop_rewriter_leaves_body() {
        assert!(DiscoveryRewriter::default().rewrite_body(HEAD).is_none());
    }

    #[test]
    fn test_all_surfaces_removed() {
        let out = all().rewrite_body(HEAD).unwrap();

        assert!(!out.contains("generator"));
        assert!(!out.contains("rss+xml"));
        assert!(!out.contains("oembed"));
        assert!(!out.contains("pingback"));
        assert!(!out.contains("api.w.org"));
        assert!(!out.contains("application/json\""));
        assert!(!out.contains("EditURI"));
        assert!(!out.contains("wp-embed"));
        assert!(out.contains(r#"<meta charset="UTF-8">"#));
        assert!(out.contains("style.css"));
    }

    #[test]
    fn test_toggles_are_independent() {
        let rsd_only = DiscoveryRewriter {
            rsd: true,
            ..Default::default()
        };
        let out = rsd_only.rewrite_body(HEAD).unwrap();
        assert!(!out.contains("EditURI"));
        assert!(out.contains("rss+xml"));
        assert!(out.contains("generator"));
        assert!(out.contains("api.w.org"));
    }

    #[test]
    fn test_feed_generator_removed() {
        let feed = "<channel>\n<generator>https://wordpress.org/?v=6.4</generator>\n<title>x</title>";
        let rewriter = DiscoveryRewriter {
            generator: true,
            ..Default::default()
        };
        let out = rewriter.rewrite_body(feed).unwrap();
        assert_eq!(out, "<channel>\n<title>x</title>");
    }

    #[test]
    fn test_pingback_methods_removed_from_method_list() {
        let body = "<methodResponse><params><param><value><array><data>\
            <value><string>system.listMethods</string></value>\
            <value><string>pingback.ping</string></value>\
            <value><string>pingback.extensions.getPingbacks</string></value>\
            <value><string>wp.getUsersBlogs</string></value>\
            </data></array></value></param></params></methodResponse>";
        let rewriter = DiscoveryRewriter {
            pingback: true,
            ..Default::default()
        };
        let out = rewriter.rewrite_body(body).unwrap();
        assert!(!out.contains("pingback."));
        assert!(out.contains("system.listMethods"));
        assert!(out.contains("wp.getUsersBlogs"));
    }

    #[test]
    fn test_rsd_wp_api_entry_removed() {
        let body = r#"<rsd version="1.0"><service><apis>
<api name="WordPress" blogID="1" preferred="true" apiLink="https://example.com/xmlrpc.php" />
<api name="WP-API" blogID="1" preferred="false" apiLink="https://example.com/wp-json/" />
</apis></service></rsd>"#;
        let rewriter = DiscoveryRewriter {
            rest: true,
            ..Default::default()
        };
        let out = rewriter.rewrite_body(body).unwrap();
        assert!(!out.contains("WP-API"));
        assert!(out.contains(r#"name="WordPress""#));
    }

    #[test]
    fn test_link_header_filtering() {
        assert_eq!(
            strip_rest_link_values(
                r#"<https://example.com/wp-json/>; rel="https://api.w.org/", <https://example.com/?p=2>; rel=shortlink"#
            ),
            "<https://example.com/?p=2>; rel=shortlink"
        );
        assert_eq!(
            strip_rest_link_values(r#"<https://example.com/wp-json/>; rel="https://api.w.org/""#),
            ""
        );
    }

    #[test]
    fn test_rewrite_headers_and_body() {
        let response = Response::builder()
            .header(CONTENT_TYPE, "text/html; charset=UTF-8")
            .header(CONTENT_LENGTH, HEAD.len())
            .header("X-Pingback", "https://example.com/xmlrpc.php")
            .header(LINK, r#"<https://example.com/wp-json/>; rel="https://api.w.org/""#)
            .header(LINK, "<https://example.com/?p=2>; rel=shortlink")
            .body(())
            .unwrap();
        let (mut parts, _) = response.into_parts();

        let body = all().rewrite(&mut parts, Bytes::from(HEAD));

        assert!(parts.headers.get("x-pingback").is_none());
        assert!(parts.headers.get(CONTENT_LENGTH).is_none());
        let links: Vec<_> = parts.headers.get_all(LINK).iter().collect();
        assert_eq!(links, vec!["<https://example.com/?p=2>; rel=shortlink"]);
        assert!(body.len() < HEAD.len());
    }

    #[test]
    fn test_binary_content_untouched() {
        let response = Response::builder()
            .header(CONTENT_TYPE, "image/png")
            .body(())
            .unwrap();
        let (mut parts, _) = response.into_parts();
        let body = Bytes::from_static(b"<link rel=\"pingback\">");

        assert_eq!(all().rewrite(&mut parts, body.clone()), body);
    }
}
