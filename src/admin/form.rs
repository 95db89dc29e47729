//! Settings form: field table, HTML rendering and input sanitizing

use std::collections::HashMap;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::options::{self, OptionStore, OptionValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Checkbox,
    TextArea { rows: u8 },
    Number { min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

impl FieldDefault {
    fn value(self) -> OptionValue {
        match self {
            FieldDefault::Bool(b) => OptionValue::Bool(b),
            FieldDefault::Int(n) => OptionValue::Int(n),
            FieldDefault::Text(s) => OptionValue::from(s),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Form input name
    pub name: &'static str,
    /// Option store key
    pub option: &'static str,
    pub label: &'static str,
    pub description: Option<&'static str>,
    pub kind: FieldKind,
    pub default: FieldDefault,
}

#[derive(Debug)]
pub struct Section {
    pub title: &'static str,
    pub fields: &'static [Field],
}

const fn checkbox(name: &'static str, option: &'static str, label: &'static str) -> Field {
    Field {
        name,
        option,
        label,
        description: None,
        kind: FieldKind::Checkbox,
        default: FieldDefault::Bool(false),
    }
}

const fn textarea(
    name: &'static str,
    option: &'static str,
    label: &'static str,
    rows: u8,
    description: &'static str,
) -> Field {
    Field {
        name,
        option,
        label,
        description: Some(description),
        kind: FieldKind::TextArea { rows },
        default: FieldDefault::Text(""),
    }
}

pub static SECTIONS: &[Section] = &[
    Section {
        title: "Content Security Policy Domains",
        fields: &[
            textarea(
                "allowed_script_domains",
                options::ALLOWED_SCRIPT_DOMAINS,
                "Script Domains (script-src)",
                3,
                "One domain per line (e.g. checkout.example.com). These domains may load scripts.",
            ),
            textarea(
                "allowed_style_domains",
                options::ALLOWED_STYLE_DOMAINS,
                "Style Domains (style-src)",
                3,
                "One domain per line for custom style sources.",
            ),
            textarea(
                "allowed_image_domains",
                options::ALLOWED_IMAGE_DOMAINS,
                "Image Domains (img-src)",
                3,
                "One domain per line (e.g. cdn.example.com). These domains may load images.",
            ),
            textarea(
                "allowed_frame_domains",
                options::ALLOWED_FRAME_DOMAINS,
                "Frame Domains (frame-src)",
                3,
                "One domain per line for allowed iframe sources.",
            ),
        ],
    },
    Section {
        title: "Query String Settings",
        fields: &[
            Field {
                description: Some(
                    "Redirects anonymous visitors to the URL without its query parameters.",
                ),
                ..checkbox(
                    "remove_query_strings",
                    options::REMOVE_QUERY_STRINGS,
                    "Remove Query Strings from URLs",
                )
            },
            textarea(
                "excluded_paths",
                options::EXCLUDED_PATHS,
                "Excluded Paths",
                5,
                "One path per line (e.g. /register/?action=check_email) or ?param. These keep their query strings and skip pattern blocking.",
            ),
        ],
    },
    Section {
        title: "Content Security Policy",
        fields: &[
            Field {
                description: Some(
                    "When disabled, a permissive policy allowing most third-party content is used.",
                ),
                ..checkbox(
                    "enable_strict_csp",
                    options::ENABLE_STRICT_CSP,
                    "Enable Strict Content Security Policy",
                )
            },
            checkbox("allow_adsense", options::ALLOW_ADSENSE, "Allow Google AdSense"),
            checkbox("allow_youtube", options::ALLOW_YOUTUBE, "Allow YouTube Embeds"),
            checkbox("allow_twitter", options::ALLOW_TWITTER, "Allow Twitter Embeds"),
        ],
    },
    Section {
        title: "Security Features",
        fields: &[Field {
            description: Some("Controls Content Security Policy and other XSS protection features."),
            default: FieldDefault::Bool(true),
            ..checkbox("enable_xss", options::ENABLE_XSS, "Enable XSS Protection")
        }],
    },
    Section {
        title: "Cookie Consent",
        fields: &[
            checkbox(
                "enable_cookie_banner",
                options::ENABLE_COOKIE_BANNER,
                "Enable Cookie Consent Banner",
            ),
            Field {
                default: FieldDefault::Text(options::DEFAULT_COOKIE_NOTICE),
                ..textarea(
                    "cookie_notice_text",
                    options::COOKIE_NOTICE_TEXT,
                    "Cookie Notice Text",
                    3,
                    "Text of the cookie consent notice.",
                )
            },
        ],
    },
    Section {
        title: "WAF Settings",
        fields: &[
            Field {
                description: Some(
                    "Protects against common web attacks including SQL injection, XSS and file inclusion attempts.",
                ),
                default: FieldDefault::Bool(true),
                ..checkbox("enable_waf", options::ENABLE_WAF, "Enable Web Application Firewall")
            },
            Field {
                name: "waf_request_limit",
                option: options::WAF_REQUEST_LIMIT,
                label: "Request Limit per Minute",
                description: None,
                kind: FieldKind::Number { min: 10, max: 1000 },
                default: FieldDefault::Int(options::DEFAULT_WAF_REQUEST_LIMIT),
            },
            Field {
                name: "waf_blacklist_threshold",
                option: options::WAF_BLACKLIST_THRESHOLD,
                label: "Blacklist Threshold (violations/24h)",
                description: None,
                kind: FieldKind::Number { min: 1, max: 100 },
                default: FieldDefault::Int(options::DEFAULT_WAF_BLACKLIST_THRESHOLD),
            },
        ],
    },
    Section {
        title: "PHP Access Exclusions",
        fields: &[textarea(
            "excluded_php_paths",
            options::EXCLUDED_PHP_PATHS,
            "Excluded PHP Paths",
            5,
            "Path prefixes allowed to serve PHP files directly (e.g. wp-login.php, wp-cron.php).",
        )],
    },
    Section {
        title: "Blocked Patterns",
        fields: &[textarea(
            "blocked_patterns",
            options::BLOCKED_PATTERNS,
            "Blocked Patterns",
            5,
            "One pattern per line (e.g. %3C, %3E). Requests whose URL contains a pattern are rejected.",
        )],
    },
    Section {
        title: "Remove Features",
        fields: &[
            checkbox("remove_feeds", options::REMOVE_FEEDS, "Remove RSS Feeds"),
            checkbox("remove_oembed", options::REMOVE_OEMBED, "Remove oEmbed Links"),
            checkbox(
                "remove_pingback",
                options::REMOVE_PINGBACK,
                "Remove Pingback and Disable XML-RPC Pingbacks",
            ),
            checkbox(
                "remove_wp_json",
                options::REMOVE_WP_JSON,
                "Remove REST API Links (wp-json)",
            ),
            checkbox("remove_rsd", options::REMOVE_RSD, "Remove RSD Link"),
            checkbox(
                "remove_wp_generator",
                options::REMOVE_WP_GENERATOR,
                "Remove Generator Meta Tag",
            ),
        ],
    },
];

pub fn fields() -> impl Iterator<Item = &'static Field> {
    SECTIONS.iter().flat_map(|section| section.fields.iter())
}

/// Current value of every field, falling back to its default
pub async fn load_values(store: &dyn OptionStore) -> HashMap<&'static str, OptionValue> {
    let mut values = HashMap::new();
    for field in fields() {
        let value = match store.get(field.option).await {
            Ok(Some(value)) => value,
            Ok(None) => field.default.value(),
            Err(e) => {
                tracing::warn!(option = field.option, error = %e, "Option read failed, showing default");
                field.default.value()
            }
        };
        values.insert(field.name, value);
    }
    values
}

/// Values to persist from a submitted form
///
/// Checkboxes are stored as presence-of-key, text is sanitized and numbers
/// are parsed leniently without range checks.
pub fn submitted_values(form: &HashMap<String, String>) -> Vec<(&'static str, OptionValue)> {
    fields()
        .map(|field| {
            let raw = form.get(field.name).map(String::as_str);
            let value = match field.kind {
                FieldKind::Checkbox => OptionValue::Bool(raw.is_some()),
                FieldKind::TextArea { .. } => {
                    OptionValue::Text(sanitize_textarea(raw.unwrap_or("")))
                }
                FieldKind::Number { .. } => OptionValue::Int(intval(raw.unwrap_or(""))),
            };
            (field.option, value)
        })
        .collect()
}

/// Parse a form body, keeping the first value of each key
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let mut form = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        form.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    form
}

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

/// Strip markup and control characters from multi-line text input
///
/// Newlines are kept; each line loses trailing whitespace and the whole
/// value is trimmed. Percent-encoded sequences are left alone so patterns
/// such as `%3C` survive.
pub fn sanitize_textarea(input: &str) -> String {
    let without_blocks = SCRIPT_OR_STYLE.replace_all(input, "");
    let without_tags = TAG.replace_all(&without_blocks, "");

    without_tags
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| {
            line.chars()
                .filter(|c| !c.is_control() || *c == '\t')
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Leading integer of the input, 0 when there is none
pub fn intval(input: &str) -> i64 {
    let s = input.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if negative { -value } else { value }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_field(out: &mut String, field: &Field, value: &OptionValue) {
    let name = field.name;
    match field.kind {
        FieldKind::Checkbox => {
            let checked = if value.as_bool() { " checked" } else { "" };
            let _ = write!(
                out,
                "<label><input type=\"checkbox\" name=\"{name}\" value=\"1\"{checked}> {}</label><br>\n",
                escape_html(field.label)
            );
        }
        FieldKind::TextArea { rows } => {
            let _ = write!(
                out,
                "<p><strong>{}</strong></p>\n<textarea name=\"{name}\" rows=\"{rows}\" cols=\"50\" class=\"large-text\">{}</textarea>\n",
                escape_html(field.label),
                escape_html(&value.as_text())
            );
        }
        FieldKind::Number { min, max } => {
            let current = value.as_int().unwrap_or(0);
            let _ = write!(
                out,
                "<label>{}: <input type=\"number\" name=\"{name}\" value=\"{current}\" min=\"{min}\" max=\"{max}\"></label><br>\n",
                escape_html(field.label)
            );
        }
    }

    if let Some(description) = field.description {
        let _ = writeln!(out, "<p class=\"description\">{}</p>", escape_html(description));
    }
}

/// Full settings page with a fresh nonce and an optional notice
pub fn render_page(
    values: &HashMap<&'static str, OptionValue>,
    nonce: &str,
    notice: Option<&str>,
) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Security Settings</title></head>\n<body>\n<div class=\"wrap\">\n<h1>Security Settings</h1>\n",
    );

    if let Some(notice) = notice {
        let _ = writeln!(
            out,
            "<div class=\"notice notice-success\"><p>{}</p></div>",
            escape_html(notice)
        );
    }

    out.push_str("<form method=\"post\" action=\"\">\n");
    let _ = writeln!(
        out,
        "<input type=\"hidden\" name=\"security_nonce\" value=\"{}\">",
        escape_html(nonce)
    );
    out.push_str("<table class=\"form-table\">\n");

    let fallback = OptionValue::Bool(false);
    for section in SECTIONS {
        let _ = write!(
            out,
            "<tr><th scope=\"row\">{}</th><td>\n",
            escape_html(section.title)
        );
        for field in section.fields {
            render_field(&mut out, field, values.get(field.name).unwrap_or(&fallback));
        }
        out.push_str("</td></tr>\n");
    }

    out.push_str(
        "</table>\n<p class=\"submit\"><input type=\"submit\" name=\"save_settings\" class=\"button button-primary\" value=\"Save Settings\"></p>\n</form>\n</div>\n</body></html>\n",
    );
    out
}
