//! Key/value option store backing the hardening settings
//!
//! Values are loosely typed (bool, integer or text) and read leniently:
//! anything malformed or missing reads as "disabled" or empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const REMOVE_QUERY_STRINGS: &str = "security_remove_query_strings";
pub const EXCLUDED_PATHS: &str = "security_excluded_paths";
pub const BLOCKED_PATTERNS: &str = "security_blocked_patterns";
pub const EXCLUDED_PHP_PATHS: &str = "security_excluded_php_paths";
pub const REMOVE_FEEDS: &str = "security_remove_feeds";
pub const REMOVE_OEMBED: &str = "security_remove_oembed";
pub const REMOVE_PINGBACK: &str = "security_remove_pingback";
pub const REMOVE_WP_JSON: &str = "security_remove_wp_json";
pub const REMOVE_RSD: &str = "security_remove_rsd";
pub const REMOVE_WP_GENERATOR: &str = "security_remove_wp_generator";

// Persisted by the settings page for collaborators outside this crate.
pub const ENABLE_XSS: &str = "security_enable_xss";
pub const ENABLE_STRICT_CSP: &str = "security_enable_strict_csp";
pub const ALLOW_ADSENSE: &str = "security_allow_adsense";
pub const ALLOW_YOUTUBE: &str = "security_allow_youtube";
pub const ALLOW_TWITTER: &str = "security_allow_twitter";
pub const COOKIE_NOTICE_TEXT: &str = "security_cookie_notice_text";
pub const ENABLE_COOKIE_BANNER: &str = "security_enable_cookie_banner";
pub const ENABLE_WAF: &str = "security_enable_waf";
pub const WAF_REQUEST_LIMIT: &str = "security_waf_request_limit";
pub const WAF_BLACKLIST_THRESHOLD: &str = "security_waf_blacklist_threshold";
pub const ALLOWED_SCRIPT_DOMAINS: &str = "security_allowed_script_domains";
pub const ALLOWED_STYLE_DOMAINS: &str = "security_allowed_style_domains";
pub const ALLOWED_IMAGE_DOMAINS: &str = "security_allowed_image_domains";
pub const ALLOWED_FRAME_DOMAINS: &str = "security_allowed_frame_domains";

pub const DEFAULT_COOKIE_NOTICE: &str = "This website uses cookies to ensure you get the best experience. By continuing to use this site, you consent to our use of cookies.";
pub const DEFAULT_WAF_REQUEST_LIMIT: i64 = 100;
pub const DEFAULT_WAF_BLACKLIST_THRESHOLD: i64 = 5;

/// Error type for option store operations
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid option file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, OptionsError>;

/// A stored option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Int(n) => *n != 0,
            OptionValue::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            ),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            OptionValue::Bool(true) => "1".to_string(),
            OptionValue::Bool(false) => String::new(),
            OptionValue::Int(n) => n.to_string(),
            OptionValue::Text(s) => s.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Bool(b) => Some(i64::from(*b)),
            OptionValue::Int(n) => Some(*n),
            OptionValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

/// Trait for option storage backends
#[async_trait::async_trait]
pub trait OptionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<OptionValue>>;
    async fn set(&self, key: &str, value: OptionValue) -> Result<()>;

    /// Read several options, in key order
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<OptionValue>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Write several options as one save
    ///
    /// Backends that persist should apply all entries or none.
    async fn set_many(&self, entries: Vec<(&str, OptionValue)>) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }
}

/// In-memory storage using DashMap
pub struct InMemoryOptionStore {
    state: DashMap<String, OptionValue>,
}

impl InMemoryOptionStore {
    pub fn new() -> Self {
        Self {
            state: DashMap::new(),
        }
    }

    pub fn with_options<I, K, V>(options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OptionValue>,
    {
        let store = Self::new();
        for (key, value) in options {
            store.state.insert(key.into(), value.into());
        }
        store
    }
}

impl Default for InMemoryOptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OptionStore for InMemoryOptionStore {
    async fn get(&self, key: &str) -> Result<Option<OptionValue>> {
        Ok(self.state.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: OptionValue) -> Result<()> {
        self.state.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON-file storage
///
/// The whole file is held in memory and rewritten through a temp file and
/// rename on every write. A batch is one rewrite; the in-memory state only
/// changes once the file is on disk.
pub struct JsonFileOptionStore {
    path: PathBuf,
    state: RwLock<BTreeMap<String, OptionValue>>,
}

impl JsonFileOptionStore {
    /// Open the store, starting empty when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| OptionsError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(OptionsError::Io { path, source }),
        };

        tracing::info!(path = %path.display(), options = state.len(), "Option store loaded");

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &BTreeMap<String, OptionValue>) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).map_err(|source| OptionsError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| OptionsError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| OptionsError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait::async_trait]
impl OptionStore for JsonFileOptionStore {
    async fn get(&self, key: &str) -> Result<Option<OptionValue>> {
        Ok(self.state.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: OptionValue) -> Result<()> {
        self.set_many(vec![(key, value)]).await
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<OptionValue>>> {
        let state = self.state.read().await;
        Ok(keys.iter().map(|key| state.get(*key).cloned()).collect())
    }

    async fn set_many(&self, entries: Vec<(&str, OptionValue)>) -> Result<()> {
        let mut state = self.state.write().await;

        let mut next = state.clone();
        for (key, value) in entries {
            next.insert(key.to_string(), value);
        }

        self.persist(&next).await?;
        *state = next;
        Ok(())
    }
}
