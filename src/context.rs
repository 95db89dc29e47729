//! Per-request view used by the filters
//!
//! Built once from the request head; filters never touch the body.

use hyper::header::COOKIE;
use hyper::{HeaderMap, Method, Uri};
use percent_encoding::percent_decode_str;

const ADMIN_PREFIX: &str = "/wp-admin";
const LOGGED_IN_COOKIE_PREFIX: &str = "wordpress_logged_in_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Path and query exactly as received
    pub request_uri: String,
    /// Raw, undecoded path
    pub path: String,
    /// Percent-decoded path with `.`/`..` segments resolved and duplicate
    /// slashes collapsed; the path the upstream will actually serve
    pub normalized_path: String,
    /// Raw, undecoded query string; `None` when absent or empty
    pub query: Option<String>,
    /// Request targets the administration area
    pub is_admin: bool,
    /// Request carries an authenticated session cookie
    pub is_logged_in: bool,
}

impl RequestContext {
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let request_uri = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let path = uri.path().to_string();
        let query = uri.query().filter(|q| !q.is_empty()).map(str::to_string);
        let normalized_path = normalize_path(&path);

        Self {
            method: method.clone(),
            is_admin: is_admin_path(&normalized_path),
            is_logged_in: has_logged_in_cookie(headers),
            request_uri,
            path,
            normalized_path,
            query,
        }
    }

    /// Convenience constructor for a bare `path[?query]` target
    pub fn for_target(target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let normalized_path = normalize_path(path);

        Self {
            method: Method::GET,
            request_uri: target.to_string(),
            is_admin: is_admin_path(&normalized_path),
            is_logged_in: false,
            path: path.to_string(),
            normalized_path,
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
        }
    }

    pub fn logged_in(mut self) -> Self {
        self.is_logged_in = true;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Decoded names of the query parameters, in order of appearance
    ///
    /// `name[...]` array syntax reduces to `name`.
    pub fn query_keys(&self) -> Vec<String> {
        let Some(query) = &self.query else {
            return Vec::new();
        };

        url::form_urlencoded::parse(query.as_bytes())
            .map(|(key, _)| match key.find('[') {
                Some(idx) if idx > 0 => key[..idx].to_string(),
                _ => key.into_owned(),
            })
            .filter(|key| !key.is_empty())
            .collect()
    }

    pub fn has_query_key(&self, name: &str) -> bool {
        self.query_keys().iter().any(|key| key == name)
    }

    /// Decoded value of the first `name` parameter
    pub fn query_value(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Raw path with leading and trailing slashes removed
    pub fn trimmed_path(&self) -> &str {
        self.path.trim_matches('/')
    }

    /// Normalized path with leading and trailing slashes removed
    pub fn trimmed_normalized_path(&self) -> &str {
        self.normalized_path.trim_matches('/')
    }
}

/// Percent-decode `raw`, drop empty and `.` segments and let `..` remove the
/// previous segment. Never climbs above the root.
pub fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(decoded.len());
    normalized.push('/');
    normalized.push_str(&segments.join("/"));
    if !segments.is_empty() && decoded.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn is_admin_path(path: &str) -> bool {
    path == ADMIN_PREFIX
        || path
            .strip_prefix(ADMIN_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn has_logged_in_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.split('=').next())
        .any(|name| name.trim().starts_with(LOGGED_IN_COOKIE_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_splits_uri() {
        let uri: Uri = "/register/?action=check_email".parse().unwrap();
        let ctx = RequestContext::from_parts(&Method::GET, &uri, &HeaderMap::new());

        assert_eq!(ctx.request_uri, "/register/?action=check_email");
        assert_eq!(ctx.path, "/register/");
        assert_eq!(ctx.query.as_deref(), Some("action=check_email"));
        assert_eq!(ctx.trimmed_path(), "register");
        assert!(!ctx.is_admin);
        assert!(!ctx.is_logged_in);
    }

    #[test]
    fn test_empty_query_is_none() {
        let uri: Uri = "/page?".parse().unwrap();
        let ctx = RequestContext::from_parts(&Method::GET, &uri, &HeaderMap::new());
        assert_eq!(ctx.query, None);
    }

    #[test]
    fn test_admin_detection() {
        assert!(RequestContext::for_target("/wp-admin").is_admin);
        assert!(RequestContext::for_target("/wp-admin/options.php").is_admin);
        assert!(!RequestContext::for_target("/wp-administrator/").is_admin);
        assert!(!RequestContext::for_target("/blog/wp-admin").is_admin);
    }

    #[test]
    fn test_logged_in_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            "theme=dark; wordpress_logged_in_abc123=admin%7C1700"
                .parse()
                .unwrap(),
        );
        let uri: Uri = "/".parse().unwrap();
        assert!(RequestContext::from_parts(&Method::GET, &uri, &headers).is_logged_in);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "wordpress_test_cookie=WP".parse().unwrap());
        assert!(!RequestContext::from_parts(&Method::GET, &uri, &headers).is_logged_in);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/blog//post/"), "/blog/post/");
        assert_eq!(normalize_path("/wp-admin/../secret.php"), "/secret.php");
        assert_eq!(normalize_path("/wp-admin/%2e%2e/secret.php"), "/secret.php");
        assert_eq!(normalize_path("/./a/./b"), "/a/b");
        assert_eq!(normalize_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize_path("/secret.ph%70"), "/secret.php");
        assert_eq!(normalize_path("/caf%C3%A9/"), "/café/");
    }

    #[test]
    fn test_dot_segments_leave_admin_area() {
        let uri: Uri = "/wp-admin/../secret.php".parse().unwrap();
        let ctx = RequestContext::from_parts(&Method::GET, &uri, &HeaderMap::new());
        assert_eq!(ctx.path, "/wp-admin/../secret.php");
        assert_eq!(ctx.normalized_path, "/secret.php");
        assert!(!ctx.is_admin);

        assert!(!RequestContext::for_target("//wp-admin/%2e%2e//secret.php").is_admin);
        assert!(RequestContext::for_target("/blog/../wp-admin/options.php").is_admin);
        assert!(RequestContext::for_target("/wp%2Dadmin/index.php").is_admin);
    }

    #[test]
    fn test_query_value() {
        let ctx = RequestContext::for_target("/?rest_route=%2Foembed%2F1.0%2Fembed&x=1&x=2");
        assert_eq!(ctx.query_value("rest_route").as_deref(), Some("/oembed/1.0/embed"));
        assert_eq!(ctx.query_value("x").as_deref(), Some("1"));
        assert_eq!(ctx.query_value("missing"), None);
    }

    #[test]
    fn test_query_keys_decoded() {
        let ctx = RequestContext::for_target("/?utm%5Fsource=x&ids[]=1&ids[]=2&flag&=orphan");
        assert_eq!(ctx.query_keys(), vec!["utm_source", "ids", "ids", "flag"]);
        assert!(ctx.has_query_key("flag"));
        assert!(!ctx.has_query_key("orphan"));
    }
}
