//! Configuration management via environment variables
//!
//! Loads configuration from environment variables with .env file support.
//! Hardening toggles are not configured here: they live in the option store
//! and are edited through the settings page.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::error::{HardenError, Result};
use crate::proxy::ProxyConfig;

pub const DEFAULT_SETTINGS_PATH: &str = "/_hardening/settings";

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub options: OptionsConfig,
    pub admin: AdminConfig,
    pub log: LogConfig,
}

/// Server binding configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Option store location
#[derive(Debug, Clone, PartialEq)]
pub struct OptionsConfig {
    /// JSON file backing the store; `None` keeps options in memory
    pub path: Option<PathBuf>,
}

/// Settings page access
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Administrator token; `None` disables the settings page
    pub token: Option<String>,
    pub settings_path: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Reads .env file if present, then parses environment variables.
    /// Returns error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            server: ServerConfig::from_env()?,
            proxy: ProxyConfig::from_env()?,
            options: OptionsConfig::from_env(),
            admin: AdminConfig::from_env()?,
            log: LogConfig::from_env()?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|e| HardenError::Config(format!("Invalid SERVER_PORT: {}", e)))?;

        Ok(Self { host, port })
    }
}

impl ProxyConfig {
    fn from_env() -> Result<Self> {
        let upstream_url = env::var("PROXY_UPSTREAM_URL")
            .map_err(|_| HardenError::Config("PROXY_UPSTREAM_URL is required".to_string()))?;

        let timeout_secs = env::var("PROXY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map_err(|e| HardenError::Config(format!("Invalid PROXY_TIMEOUT_SECS: {}", e)))?;

        let preserve_host = env::var("PROXY_PRESERVE_HOST")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|e| HardenError::Config(format!("Invalid PROXY_PRESERVE_HOST: {}", e)))?;

        Ok(ProxyConfig::new(upstream_url)
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_preserve_host(preserve_host))
    }
}

impl OptionsConfig {
    fn from_env() -> Self {
        Self {
            path: non_empty_var("OPTIONS_PATH").map(PathBuf::from),
        }
    }
}

impl AdminConfig {
    fn from_env() -> Result<Self> {
        let token = non_empty_var("ADMIN_TOKEN");

        let settings_path =
            env::var("SETTINGS_PATH").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
        if !settings_path.starts_with('/') {
            return Err(HardenError::Config(format!(
                "Invalid SETTINGS_PATH: {}. Must start with '/'",
                settings_path
            )));
        }

        Ok(Self {
            token,
            settings_path,
        })
    }
}

impl LogConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let level = Level::from_str(&level)
            .map_err(|_| HardenError::Config(format!("Invalid LOG_LEVEL: {}", level)))?;

        Ok(Self { level })
    }
}
