//! Settings page served by the proxy
//!
//! GET renders the form, POST verifies the nonce and persists the submitted
//! options. Both require the administrator token.

pub mod form;
pub mod nonce;

pub use nonce::NonceStore;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderValue, WWW_AUTHENTICATE};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};

use crate::options::OptionStore;

pub const MAX_FORM_BYTES: usize = 64 * 1024;
pub const SECURITY_CHECK_FAILED: &str = "Security check failed.";
pub const SETTINGS_SAVED: &str = "Settings saved.";

const REALM: &str = "Basic realm=\"Site Hardening\"";

pub struct SettingsPage {
    store: Arc<dyn OptionStore>,
    nonces: NonceStore,
    admin_token: String,
    path: String,
}

impl SettingsPage {
    pub fn new(store: Arc<dyn OptionStore>, admin_token: String, path: String) -> Self {
        Self {
            store,
            nonces: NonceStore::default(),
            admin_token,
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn matches(&self, path: &str) -> bool {
        matches_path(&self.path, path)
    }

    /// Bearer token, or Basic credentials whose password is the token
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };

        let presented = if let Some(token) = value.strip_prefix("Bearer ") {
            token.trim().to_string()
        } else if let Some(encoded) = value.strip_prefix("Basic ") {
            let Ok(decoded) = general_purpose::STANDARD.decode(encoded.trim()) else {
                return false;
            };
            let Ok(credentials) = String::from_utf8(decoded) else {
                return false;
            };
            match credentials.split_once(':') {
                Some((_, password)) => password.to_string(),
                None => return false,
            }
        } else {
            return false;
        };

        constant_time_eq(presented.as_bytes(), self.admin_token.as_bytes())
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if !self.is_authorized(req.headers()) {
            tracing::warn!(path = %self.path, "Settings page access without valid credentials");
            let mut response = page_response(
                StatusCode::UNAUTHORIZED,
                "You do not have sufficient permissions to access this page.".to_string(),
            );
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
            return response;
        }

        match *req.method() {
            Method::GET | Method::HEAD => self.render(None).await,
            Method::POST => self.submit(req).await,
            _ => page_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
            ),
        }
    }

    async fn render(&self, notice: Option<&str>) -> Response<Full<Bytes>> {
        let values = form::load_values(self.store.as_ref()).await;
        let nonce = self.nonces.issue();
        page_response(StatusCode::OK, form::render_page(&values, &nonce, notice))
    }

    async fn submit<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body = match Limited::new(req.into_body(), MAX_FORM_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(error = %e, "Settings form body rejected");
                return page_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Form submission too large".to_string(),
                );
            }
        };

        let submitted = form::parse_form(&body);

        let nonce_ok = submitted
            .get("security_nonce")
            .is_some_and(|nonce| self.nonces.verify(nonce));
        if !nonce_ok {
            tracing::warn!("Settings form nonce check failed");
            return page_response(StatusCode::FORBIDDEN, SECURITY_CHECK_FAILED.to_string());
        }

        if !submitted.contains_key("save_settings") {
            return self.render(None).await;
        }

        if let Err(e) = self.store.set_many(form::submitted_values(&submitted)).await {
            tracing::error!(error = %e, "Failed to save settings");
            return page_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save settings".to_string(),
            );
        }

        tracing::info!("Hardening settings saved");
        self.render(Some(SETTINGS_SAVED)).await
    }
}

/// Exact match on the configured settings path, with or without a trailing slash
pub fn matches_path(settings_path: &str, path: &str) -> bool {
    path == settings_path || path.strip_suffix('/') == Some(settings_path)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn page_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
