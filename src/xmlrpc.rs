//! XML-RPC pingback call screening
//!
//! With pingback removed, `pingback.ping` and
//! `pingback.extensions.getPingbacks` no longer exist as callable methods.
//! Calls to them (directly or inside `system.multicall`) are answered here
//! with the same "method does not exist" fault the site returns for any
//! unregistered method, and never reach the upstream.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Response, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::RequestContext;
use crate::settings::HardeningSettings;

/// Largest XML-RPC call buffered for inspection
pub const MAX_CALL_BYTES: usize = 8 * 1024 * 1024;

pub const PINGBACK_METHODS: &[&str] = &["pingback.ping", "pingback.extensions.getPingbacks"];

const ENDPOINT: &str = "xmlrpc.php";
const MULTICALL: &str = "system.multicall";
const METHOD_NOT_FOUND: i32 = -32601;

static METHOD_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<methodName\s*>(.*?)</methodName\s*>").expect("valid regex")
});
static CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));
static CHAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").expect("valid regex"));
static NESTED_PINGBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r">\s*(pingback\.(?:ping|extensions\.getPingbacks))\s*<").expect("valid regex")
});

/// True when the request body has to be buffered and screened
pub fn needs_screening(ctx: &RequestContext, settings: &HardeningSettings) -> bool {
    settings.remove_pingback
        && ctx.method == Method::POST
        && ctx
            .normalized_path
            .rsplit('/')
            .next()
            .is_some_and(|script| script.eq_ignore_ascii_case(ENDPOINT))
}

/// Unwrap CDATA sections and resolve entity and character references, the
/// way the XML parser on the site does before dispatching
fn unescape(text: &str) -> String {
    let text = CDATA.replace_all(text, "$1");
    let text = CHAR_REF.replace_all(&text, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Name of the method an XML-RPC call invokes
pub fn method_name(body: &[u8]) -> Option<String> {
    let body = String::from_utf8_lossy(body);
    METHOD_NAME
        .captures(&body)
        .map(|caps| unescape(&caps[1]).trim().to_string())
}

/// The removed pingback method this call would run, if any
pub fn blocked_method(body: &[u8]) -> Option<&'static str> {
    let method = method_name(body)?;

    if let Some(blocked) = PINGBACK_METHODS.iter().copied().find(|m| *m == method) {
        return Some(blocked);
    }

    if method == MULTICALL {
        let body = unescape(&String::from_utf8_lossy(body));
        let nested = NESTED_PINGBACK.captures(&body)?;
        return PINGBACK_METHODS.iter().copied().find(|m| *m == &nested[1]);
    }

    None
}

/// XML-RPC fault for a method that is not registered
pub fn method_not_found(method: &str) -> Response<Full<Bytes>> {
    let body = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<methodResponse><fault><value><struct>",
            "<member><name>faultCode</name><value><int>{}</int></value></member>",
            "<member><name>faultString</name><value><string>",
            "server error. requested method {} does not exist.",
            "</string></value></member>",
            "</struct></value></fault></methodResponse>\n",
        ),
        METHOD_NOT_FOUND, method
    );

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=UTF-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
