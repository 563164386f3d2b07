//! Bearer token issuance and validation.
//!
//! Two token kinds identify the two parties of a link: `ClientToken` (one per
//! browser/mobile install) and `WalletToken` (one per wallet install). Tokens
//! are opaque 128-bit random values, issued on first contact and persisted for
//! the lifetime of the install. They never expire on their own; unlinking
//! removes links, not the identity.

use crate::error::{LinkerError, LinkerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

const TOKEN_BYTES: usize = 16;

/// Identifies one browser/mobile client install.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(pub String);

/// Identifies one wallet install.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletToken(pub String);

impl ClientToken {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl WalletToken {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Display for WalletToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Issues unguessable bearer tokens and answers whether a presented token was
/// issued here. One store per token kind.
pub struct TokenStore {
    issued: Mutex<HashSet<String>>,
}

impl Default for TokenStore {
    fn default() -> Self { Self::new() }
}

impl TokenStore {
    pub fn new() -> Self {
        Self { issued: Mutex::new(HashSet::new()) }
    }

    /// Generate a fresh token: 16 random bytes, url-safe base64.
    pub fn issue(&self) -> LinkerResult<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let mut issued = self.issued.lock().map_err(|_| LinkerError::lock("token store"))?;
        issued.insert(token.clone());
        Ok(token)
    }

    /// True when `token` is well-formed and was issued by this store.
    /// Malformed input is `false`, never an error.
    pub fn validate(&self, token: &str) -> bool {
        let well_formed = URL_SAFE_NO_PAD
            .decode(token)
            .map(|b| b.len() == TOKEN_BYTES)
            .unwrap_or(false);
        if !well_formed {
            return false;
        }
        self.issued
            .lock()
            .map(|issued| issued.contains(token))
            .unwrap_or(false)
    }

    /// Re-register a token issued in a previous process lifetime.
    pub fn adopt(&self, token: &str) -> LinkerResult<()> {
        let mut issued = self.issued.lock().map_err(|_| LinkerError::lock("token store"))?;
        issued.insert(token.to_string());
        Ok(())
    }
}
