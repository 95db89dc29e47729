//! wp-harden - site-hardening reverse proxy for WordPress
//!
//! Sits in front of the site and applies operator-controlled toggles:
//! - Query-string stripping with reserved-parameter and path exclusions
//! - Direct PHP access gating
//! - Blocked-pattern rejection
//! - Removal of discovery surfaces (feeds, oEmbed, pingback, REST, RSD, generator)
//! - Screening of XML-RPC pingback calls
//! - Settings page backed by a key/value option store

pub mod admin;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod options;
pub mod proxy;
pub mod server;
pub mod settings;
pub mod xmlrpc;
