//! Unified error types for wp-harden

use std::net::SocketAddr;
use thiserror::Error;

use crate::options::OptionsError;

#[derive(Error, Debug)]
pub enum HardenError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Connection error from {remote}: {source}")]
    Connection {
        remote: SocketAddr,
        source: hyper::Error,
    },

    #[error("Upstream connection failed: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Option store error: {0}")]
    Options(#[from] OptionsError),
}

pub type Result<T> = std::result::Result<T, HardenError>;
