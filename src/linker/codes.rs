//! Short-lived, single-use pairing codes.
//!
//! A code maps to a pending link: the client identity that asked for it, the
//! app context a wallet inspects before committing, and an optional call to
//! replay once linked. Codes are consumed atomically; the second of two
//! concurrent wallets scanning the same code loses with `AlreadyConsumed`.

use crate::error::{LinkerError, LinkerResult};
use crate::token::ClientToken;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Unambiguous uppercase alphanumerics: no 0/O or 1/I. Eight characters give
/// ~40 bits, impractical to guess inside a minutes-long expiry window.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Remember this many consumed codes so a replay is told `AlreadyConsumed`
/// rather than `NotFound`.
const CONSUMED_MEMORY: usize = 256;

/// What a link code stands for until it is consumed or expires.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    pub client_token: ClientToken,
    pub session_token: String,
    /// Link id the pairing will take, allocated up front so `link-info` can
    /// show it before the wallet commits.
    pub link_id: String,
    pub app_info: Value,
    pub pending_call: Option<Value>,
    pub return_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct RegistryInner {
    pending: HashMap<String, PendingLink>,
    consumed: HashSet<String>,
    consumed_order: VecDeque<String>,
}

/// Registry of outstanding pairing codes. Expired entries are swept
/// opportunistically on every mutation.
pub struct LinkCodeRegistry {
    inner: Mutex<RegistryInner>,
    expiry: Duration,
    code_length: usize,
}

impl LinkCodeRegistry {
    pub fn new(expiry: Duration, code_length: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                pending: HashMap::new(),
                consumed: HashSet::new(),
                consumed_order: VecDeque::new(),
            }),
            expiry,
            code_length,
        }
    }

    fn random_code(&self) -> String {
        let mut rng = rand::rngs::OsRng;
        (0..self.code_length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    /// Allocate a fresh code bound to `pending`. Expiry stamps are set here.
    pub fn insert(
        &self,
        client_token: ClientToken,
        session_token: String,
        link_id: String,
        app_info: Value,
        pending_call: Option<Value>,
        return_url: Option<String>,
    ) -> LinkerResult<String> {
        let now = Utc::now();
        let mut inner = self.inner.lock().map_err(|_| LinkerError::lock("code registry"))?;
        sweep(&mut inner, now);

        let mut code = self.random_code();
        while inner.pending.contains_key(&code) || inner.consumed.contains(&code) {
            code = self.random_code();
        }

        inner.pending.insert(
            code.clone(),
            PendingLink {
                client_token,
                session_token,
                link_id,
                app_info,
                pending_call,
                return_url,
                created_at: now,
                expires_at: now + self.expiry,
            },
        );
        Ok(code)
    }

    /// Read-only lookup for a wallet inspecting a code before linking.
    pub fn get(&self, code: &str) -> LinkerResult<PendingLink> {
        let inner = self.inner.lock().map_err(|_| LinkerError::lock("code registry"))?;
        let pending = inner.pending.get(code).ok_or(LinkerError::NotFound)?;
        if Utc::now() >= pending.expires_at {
            return Err(LinkerError::Expired);
        }
        Ok(pending.clone())
    }

    /// Atomic check-and-remove. Exactly one caller per code succeeds; a
    /// replay within the consumed-memory horizon gets `AlreadyConsumed`.
    pub fn consume(&self, code: &str) -> LinkerResult<PendingLink> {
        let now = Utc::now();
        let mut inner = self.inner.lock().map_err(|_| LinkerError::lock("code registry"))?;

        match inner.pending.remove(code) {
            Some(pending) if now >= pending.expires_at => Err(LinkerError::Expired),
            Some(pending) => {
                inner.consumed.insert(code.to_string());
                inner.consumed_order.push_back(code.to_string());
                while inner.consumed_order.len() > CONSUMED_MEMORY {
                    if let Some(old) = inner.consumed_order.pop_front() {
                        inner.consumed.remove(&old);
                    }
                }
                Ok(pending)
            }
            None if inner.consumed.contains(code) => Err(LinkerError::AlreadyConsumed),
            None => Err(LinkerError::NotFound),
        }
    }
}

fn sweep(inner: &mut RegistryInner, now: DateTime<Utc>) {
    inner.pending.retain(|_, p| now < p.expires_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(expiry_secs: i64) -> LinkCodeRegistry {
        LinkCodeRegistry::new(Duration::seconds(expiry_secs), 8)
    }

    fn insert(reg: &LinkCodeRegistry) -> String {
        reg.insert(
            ClientToken("client".into()),
            "session".into(),
            "link-1".into(),
            json!({"user_agent": "test"}),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn consume_is_single_use() {
        let reg = registry(300);
        let code = insert(&reg);
        assert!(reg.consume(&code).is_ok());
        assert_eq!(reg.consume(&code), Err(LinkerError::AlreadyConsumed));
    }

    #[test]
    fn unknown_code_is_not_found() {
        let reg = registry(300);
        assert_eq!(reg.consume("NOSUCHCD"), Err(LinkerError::NotFound));
        assert_eq!(reg.get("NOSUCHCD").unwrap_err(), LinkerError::NotFound);
    }

    #[test]
    fn expired_code_cannot_link() {
        let reg = registry(0);
        let code = insert(&reg);
        assert_eq!(reg.consume(&code), Err(LinkerError::Expired));
    }

    #[test]
    fn expired_codes_are_swept_on_insert() {
        let reg = registry(0);
        let stale = insert(&reg);
        let _fresh = insert(&reg); // triggers sweep
        assert_eq!(reg.get(&stale).unwrap_err(), LinkerError::NotFound);
    }

    #[test]
    fn codes_use_unambiguous_alphabet() {
        let reg = registry(300);
        let code = insert(&reg);
        assert_eq!(code.len(), 8);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
}
