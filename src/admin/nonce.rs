//! Form nonces for the settings page

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose;
use dashmap::DashMap;
use rand::RngCore;

/// Nonces stay valid for half a day, matching the usual admin form lifetime
pub const DEFAULT_NONCE_LIFETIME_SECS: u64 = 12 * 60 * 60;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issued nonces with their expiry (seconds since UNIX epoch)
pub struct NonceStore {
    issued: DashMap<String, u64>,
    lifetime_secs: u64,
}

impl NonceStore {
    pub fn new(lifetime_secs: u64) -> Self {
        Self {
            issued: DashMap::new(),
            lifetime_secs,
        }
    }

    pub fn issue(&self) -> String {
        let now = now_secs();
        self.issued.retain(|_, expires| *expires > now);

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        self.issued
            .insert(nonce.clone(), now.saturating_add(self.lifetime_secs));
        nonce
    }

    pub fn verify(&self, nonce: &str) -> bool {
        let now = now_secs();
        match self.issued.get(nonce).map(|entry| *entry.value()) {
            Some(expires) if expires > now => true,
            Some(_) => {
                self.issued.remove(nonce);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_LIFETIME_SECS)
    }
}
