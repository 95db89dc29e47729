//! TCP server with connection handling
//!
//! Responsibilities:
//! - Accept TCP connections
//! - HTTP/1.1 parsing via hyper
//! - Spawn per-connection tasks
//! - Per-request settings snapshot and filter chain execution
//! - XML-RPC pingback call screening
//! - Settings page routing

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::admin::{self, SettingsPage};
use crate::config::DEFAULT_SETTINGS_PATH;
use crate::context::{RequestContext, normalize_path};
use crate::discovery::DiscoveryRewriter;
use crate::error::{HardenError, Result};
use crate::filter::{FilterAction, FilterChain};
use crate::options::OptionStore;
use crate::proxy::{ProxyBody, ProxyClient};
use crate::settings::HardeningSettings;
use crate::xmlrpc;

/// Everything a request handler needs, shared across connections
pub struct Hardener {
    filter_chain: FilterChain,
    proxy_client: ProxyClient,
    options: Arc<dyn OptionStore>,
    settings_path: String,
    settings_page: Option<SettingsPage>,
}

impl Hardener {
    pub fn new(
        filter_chain: FilterChain,
        proxy_client: ProxyClient,
        options: Arc<dyn OptionStore>,
    ) -> Self {
        Self {
            filter_chain,
            proxy_client,
            options,
            settings_path: DEFAULT_SETTINGS_PATH.to_string(),
            settings_page: None,
        }
    }

    /// Path reserved for the settings page; answered with 404 while no page
    /// is configured
    pub fn with_settings_path(mut self, path: String) -> Self {
        self.settings_path = path;
        self
    }

    pub fn with_settings_page(mut self, page: SettingsPage) -> Self {
        self.settings_path = page.path().to_string();
        self.settings_page = Some(page);
        self
    }
}

/// Main server struct with integrated filter chain and proxy
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    hardener: Arc<Hardener>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, hardener: Hardener) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HardenError::Bind { addr, source: e })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|e| HardenError::Config(format!("Failed to get local address: {}", e)))?;

        info!(%actual_addr, "Server bound successfully");

        Ok(Self {
            listener,
            addr: actual_addr,
            hardener: Arc::new(hardener),
        })
    }

    pub async fn run(self) -> Result<()> {
        info!(addr = %self.addr, "Starting server");

        loop {
            let (stream, remote_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(%e, "Failed to accept connection");
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let hardener = self.hardener.clone();

            tokio::spawn(async move {
                let service =
                    service_fn(move |req| handle_request(req, remote_addr, hardener.clone()));
                if let Err(source) = http1::Builder::new().serve_connection(io, service).await {
                    let e = HardenError::Connection {
                        remote: remote_addr,
                        source,
                    };
                    warn!(%e, "Connection closed with error");
                }
            });
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Handle a single HTTP request
///
/// Flow:
/// 1. The settings path goes to the settings handler, or 404 without one
/// 2. Load the settings snapshot and execute the filter chain
/// 3. If Allow: screen XML-RPC pingback calls, then forward to upstream and
///    strip discovery surfaces
/// 4. If Redirect/Deny: return the filter response
async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    hardener: Arc<Hardener>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    info!(%remote_addr, %method, %uri, "Request received");

    if admin::matches_path(&hardener.settings_path, &normalize_path(uri.path())) {
        return Ok(match &hardener.settings_page {
            Some(page) => page.handle(req).await,
            None => not_found(),
        });
    }

    let settings = HardeningSettings::load(hardener.options.as_ref()).await;
    let ctx = RequestContext::from_parts(req.method(), req.uri(), req.headers());

    let response = match hardener.filter_chain.execute(&ctx, &settings) {
        FilterAction::Allow => {
            let req = if xmlrpc::needs_screening(&ctx, &settings) {
                match screen_xmlrpc(req).await {
                    Ok(req) => req,
                    Err(response) => return Ok(response),
                }
            } else {
                req.map(BodyExt::boxed)
            };

            let rewriter = DiscoveryRewriter::from_settings(&settings);
            match hardener
                .proxy_client
                .forward(req, remote_addr, rewriter)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(%remote_addr, error = %e, "Proxy forward failed");
                    bad_gateway()
                }
            }
        }
        other => hardener.filter_chain.action_to_response(other),
    };

    Ok(response)
}

/// Buffer an XML-RPC call and answer removed pingback methods locally
async fn screen_xmlrpc(
    req: Request<Incoming>,
) -> std::result::Result<Request<ProxyBody>, Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, xmlrpc::MAX_CALL_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(uri = %parts.uri, "XML-RPC call too large to screen");
            return Err(plain_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large",
            ));
        }
        Err(e) => {
            warn!(uri = %parts.uri, error = %e, "Failed to read XML-RPC call");
            return Err(plain_response(StatusCode::BAD_REQUEST, "Bad Request"));
        }
    };

    if let Some(method) = xmlrpc::blocked_method(&body) {
        info!(uri = %parts.uri, method, "Removed pingback method called");
        return Err(xmlrpc::method_not_found(method));
    }

    let body = Full::new(body).map_err(|never| match never {}).boxed();
    Ok(Request::from_parts(parts, body))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn bad_gateway() -> Response<Full<Bytes>> {
    plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

fn not_found() -> Response<Full<Bytes>> {
    plain_response(StatusCode::NOT_FOUND, "Not Found")
}
