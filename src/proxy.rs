//! Reverse proxy to the upstream site
//!
//! Handles request forwarding with:
//! - Connection pooling to backend
//! - Header rewriting (X-Forwarded-For, X-Real-IP, Host)
//! - Buffered responses passed through the discovery rewriter

use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ACCEPT_ENCODING, HOST, HeaderValue};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;

use crate::discovery::DiscoveryRewriter;
use crate::error::{HardenError, Result};

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream site URL (e.g., "http://localhost:8000")
    pub upstream_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Preserve Host header from original request
    pub preserve_host: bool,
}

impl ProxyConfig {
    pub fn new(upstream_url: String) -> Self {
        Self {
            upstream_url,
            timeout: Duration::from_secs(30),
            preserve_host: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_preserve_host(mut self, preserve: bool) -> Self {
        self.preserve_host = preserve;
        self
    }
}

/// Request body handed to the upstream: streamed from the client, or
/// buffered when it had to be inspected first
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Reverse proxy client with connection pooling
pub struct ProxyClient {
    config: ProxyConfig,
    client: Client<HttpConnector, ProxyBody>,
    upstream_uri: Uri,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let upstream_uri: Uri = config
            .upstream_url
            .parse()
            .map_err(|e| HardenError::Config(format!("Invalid upstream URL: {}", e)))?;

        if upstream_uri.authority().is_none() {
            return Err(HardenError::Config(format!(
                "Invalid upstream URL: {} has no host",
                config.upstream_url
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            config,
            client,
            upstream_uri,
        })
    }

    /// Forward an allowed request and strip discovery surfaces from the reply
    pub async fn forward(
        &self,
        mut req: Request<ProxyBody>,
        client_addr: SocketAddr,
        rewriter: DiscoveryRewriter,
    ) -> Result<Response<Full<Bytes>>> {
        let upstream_path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let upstream_uri = format!(
            "{}://{}{}",
            self.upstream_uri.scheme_str().unwrap_or("http"),
            self.upstream_uri
                .authority()
                .map(|a| a.as_str())
                .unwrap_or("localhost"),
            upstream_path
        );

        *req.uri_mut() = upstream_uri
            .parse()
            .map_err(|e| HardenError::Upstream(format!("Failed to parse upstream URI: {}", e)))?;

        self.rewrite_headers(req.headers_mut(), client_addr);

        // Bodies must arrive uncompressed to be rewritten
        if !rewriter.is_noop() {
            req.headers_mut().remove(ACCEPT_ENCODING);
        }

        let response = tokio::time::timeout(self.config.timeout, self.client.request(req))
            .await
            .map_err(|_| HardenError::Upstream("Upstream request timeout".to_string()))?
            .map_err(|e| HardenError::Upstream(format!("Upstream request failed: {}", e)))?;

        let (mut parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| HardenError::Upstream(format!("Failed to read upstream response: {}", e)))?
            .to_bytes();

        let body_bytes = rewriter.rewrite(&mut parts, body_bytes);

        Ok(Response::from_parts(parts, Full::new(body_bytes)))
    }

    /// Rewrite request headers for proxy
    fn rewrite_headers(&self, headers: &mut HeaderMap, client_addr: SocketAddr) {
        let client_ip = client_addr.ip().to_string();
        let forwarded_for = match headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, client_ip),
            None => client_ip.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert("x-forwarded-for", value);
        }

        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert("x-real-ip", value);
        }

        if !self.config.preserve_host {
            if let Some(value) = self
                .upstream_uri
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
            {
                headers.insert(HOST, value);
            }
        }

        headers.remove("connection");
        headers.remove("keep-alive");
        headers.remove("proxy-authenticate");
        headers.remove("proxy-authorization");
        headers.remove("te");
        headers.remove("trailers");
        headers.remove("transfer-encoding");
        headers.remove("upgrade");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_config_builder() {
        let config = ProxyConfig::new("http://localhost:8000".to_string())
            .with_timeout(Duration::from_secs(10))
            .with_preserve_host(true);

        assert_eq!(config.upstream_url, "http://localhost:8000");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.preserve_host);
    }

    #[test]
    fn test_proxy_client_creation() {
        let config = ProxyConfig::new("http://localhost:8000".to_string());
        let client = ProxyClient::new(config);

        assert!(client.is_ok());
    }

    #[test]
    fn test_proxy_client_invalid_url() {
        let config = ProxyConfig::new("not a url".to_string());
        assert!(ProxyClient::new(config).is_err());

        let config = ProxyConfig::new("/relative".to_string());
        assert!(ProxyClient::new(config).is_err());
    }

    #[test]
    fn test_rewrite_headers_appends_forwarded_for() {
        let client = ProxyClient::new(ProxyConfig::new("http://backend:8000".to_string())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());

        client.rewrite_headers(&mut headers, "192.168.1.5:5000".parse().unwrap());

        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 192.168.1.5");
        assert_eq!(headers.get("x-real-ip").unwrap(), "192.168.1.5");
        assert_eq!(headers.get(HOST).unwrap(), "backend:8000");
        assert!(headers.get("connection").is_none());
    }
}
