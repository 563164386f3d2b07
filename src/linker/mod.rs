//! Linker - the facade tying pairing, links, feeds, and call routing together.
//!
//! Owns every store explicitly (no ambient globals); the HTTP/WS layer holds
//! one `Arc<Linker>` and calls plain methods. Lifecycle is tied to the
//! service process: `shutdown` stops new subscriptions and cuts live ones.

mod config;

pub mod calls;
pub mod codes;
pub mod links;

pub use config::LinkerConfig;

use crate::error::{LinkerError, LinkerResult};
use crate::relay::{MessageRelay, Subscription};
use crate::token::{ClientToken, TokenStore, WalletToken};
use calls::CallCoordinator;
use codes::LinkCodeRegistry;
use links::{Link, LinkTable};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Outcome of `generate_code`. `link_code` is absent when the client already
/// holds an established link and the pairing UX can be skipped.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub client_token: ClientToken,
    pub session_token: String,
    pub link_code: Option<String>,
    pub linked: bool,
}

/// Read-only view a wallet gets before committing to a link.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub app_info: Value,
    pub link_id: String,
}

/// Outcome of `link_wallet`.
#[derive(Debug, Clone)]
pub struct LinkGrant {
    pub linked: bool,
    pub wallet_token: WalletToken,
    pub link_id: String,
    pub linked_at: DateTime<Utc>,
    pub app_info: Value,
    /// The call the client queued before pairing, surfaced immediately so the
    /// wallet need not wait for the relay.
    pub pending_call_context: Option<Value>,
}

/// Session-token bindings, bounded by count: the oldest binding ages out
/// once the cap is hit. Each key appears exactly once in `order` because the
/// only removal path is eviction here.
struct SessionMap {
    map: HashMap<String, ClientToken>,
    order: VecDeque<String>,
    cap: usize,
}

impl SessionMap {
    fn new(cap: usize) -> Self {
        Self { map: HashMap::new(), order: VecDeque::new(), cap: cap.max(1) }
    }

    fn bind(&mut self, session: String, client: ClientToken) {
        if self.map.insert(session.clone(), client).is_none() {
            self.order.push_back(session);
            while self.map.len() > self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                }
            }
        }
    }

    fn owner(&self, session: &str) -> Option<ClientToken> {
        self.map.get(session).cloned()
    }
}

pub struct Linker {
    config: LinkerConfig,
    client_tokens: TokenStore,
    wallet_tokens: TokenStore,
    codes: LinkCodeRegistry,
    links: Arc<LinkTable>,
    relay: Arc<MessageRelay>,
    coordinator: CallCoordinator,
    /// Session scope decision: a session token belongs to one client token,
    /// so every tab of one browser shares that client's links instead of
    /// creating independent ones.
    sessions: Mutex<SessionMap>,
}

impl Linker {
    pub fn new(config: LinkerConfig) -> Self {
        let links = Arc::new(LinkTable::new());
        let relay = Arc::new(MessageRelay::new(config.backlog_cap));
        let coordinator = CallCoordinator::new(links.clone(), relay.clone());
        Self {
            codes: LinkCodeRegistry::new(config.code_expiry, config.code_length),
            client_tokens: TokenStore::new(),
            wallet_tokens: TokenStore::new(),
            links,
            relay,
            coordinator,
            sessions: Mutex::new(SessionMap::new(config.session_cap)),
            config,
        }
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    fn fresh_session_token() -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn fresh_link_id() -> String {
        let mut bytes = [0u8; 10];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn session_client(&self, session_token: &str) -> LinkerResult<ClientToken> {
        let sessions = self.sessions.lock().map_err(|_| LinkerError::lock("sessions"))?;
        sessions.owner(session_token).ok_or(LinkerError::NotFound)
    }

    /// Start (or short-circuit) a pairing. Allocates a client token when the
    /// caller presents none, binds a session to that client, and either hands
    /// back a scannable code or reports `linked=true` when a link already
    /// stands.
    pub fn generate_code(
        &self,
        client_token: Option<String>,
        session_token: Option<String>,
        app_info: Value,
        return_url: Option<String>,
        pending_call: Option<Value>,
    ) -> LinkerResult<CodeGrant> {
        let client = match client_token {
            Some(t) if self.client_tokens.validate(&t) => ClientToken(t),
            _ => ClientToken(self.client_tokens.issue()?),
        };
        let session = session_token.unwrap_or_else(Self::fresh_session_token);

        {
            let mut sessions = self.sessions.lock().map_err(|_| LinkerError::lock("sessions"))?;
            sessions.bind(session.clone(), client.clone());
        }

        if !self.links.links_for_client(&client)?.is_empty() {
            return Ok(CodeGrant {
                client_token: client,
                session_token: session,
                link_code: None,
                linked: true,
            });
        }

        let code = self.codes.insert(
            client.clone(),
            session.clone(),
            Self::fresh_link_id(),
            app_info,
            pending_call,
            return_url,
        )?;
        info!(code = %code, "pairing code issued");
        Ok(CodeGrant {
            client_token: client,
            session_token: session,
            link_code: Some(code),
            linked: false,
        })
    }

    /// Wallet-side peek at a code before committing.
    pub fn get_link_info(&self, code: &str) -> LinkerResult<LinkInfo> {
        let pending = self.codes.get(code)?;
        Ok(LinkInfo { app_info: pending.app_info, link_id: pending.link_id })
    }

    /// Consume a code and establish (or refresh) the link. Allocates a wallet
    /// token when the wallet presents none. Exactly one caller per code gets
    /// here; see `LinkCodeRegistry::consume`.
    pub fn link_wallet(
        &self,
        wallet_token: Option<String>,
        code: &str,
        current_rpc: Option<String>,
        current_accounts: Vec<String>,
    ) -> LinkerResult<LinkGrant> {
        let pending = self.codes.consume(code)?;
        let wallet = match wallet_token {
            Some(t) if self.wallet_tokens.validate(&t) => WalletToken(t),
            _ => WalletToken(self.wallet_tokens.issue()?),
        };
        let link = self.links.upsert(
            pending.link_id,
            pending.client_token,
            wallet.clone(),
            pending.app_info.clone(),
            current_rpc,
            current_accounts,
        )?;
        info!(link_id = %link.link_id, "wallet linked");
        Ok(LinkGrant {
            linked: true,
            wallet_token: wallet,
            link_id: link.link_id,
            linked_at: link.linked_at,
            app_info: pending.app_info,
            pending_call_context: pending.pending_call,
        })
    }

    /// All links for a wallet, most recent first.
    pub fn wallet_links(&self, wallet_token: &str) -> LinkerResult<Vec<Link>> {
        self.links.wallet_links(&WalletToken(wallet_token.to_string()))
    }

    /// Remove every link the client holds. True when any went away.
    pub fn unlink(&self, client_token: &str) -> LinkerResult<bool> {
        let removed = self.links.unlink_client(&ClientToken(client_token.to_string()))?;
        if removed > 0 {
            info!(removed, "client unlinked");
        }
        Ok(removed > 0)
    }

    /// Remove one of the wallet's links. Ownership is checked, not just
    /// existence.
    pub fn unlink_wallet(&self, wallet_token: &str, link_id: &str) -> LinkerResult<bool> {
        self.links
            .unlink_wallet(&WalletToken(wallet_token.to_string()), link_id)?;
        info!(link_id, "wallet unlinked");
        Ok(true)
    }

    /// Route a client's call to its linked wallets. The session must belong
    /// to the presenting client token.
    pub async fn call_wallet(
        &self,
        client_token: &str,
        session_token: &str,
        account: Option<String>,
        call_id: String,
        payload: Value,
        return_url: Option<String>,
    ) -> LinkerResult<bool> {
        let owner = self.session_client(session_token)?;
        if owner.as_str() != client_token {
            return Err(LinkerError::Unauthorized);
        }
        self.coordinator
            .call_wallet(&owner, session_token, account, call_id, payload, return_url)
            .await
    }

    /// Route a wallet's result back to the originating session. The session
    /// must resolve to the link's own client: a wallet holding one valid
    /// link must not deposit results onto an unrelated client's feed.
    pub async fn wallet_called(
        &self,
        wallet_token: &str,
        call_id: &str,
        link_id: &str,
        session_token: &str,
        result: Value,
    ) -> LinkerResult<bool> {
        if let Some(link) = self.links.get(link_id)? {
            let owner = self.session_client(session_token)?;
            if owner != link.client_token {
                return Err(LinkerError::Unauthorized);
            }
        }
        self.coordinator
            .wallet_called(
                &WalletToken(wallet_token.to_string()),
                call_id,
                link_id,
                session_token,
                result,
            )
            .await
    }

    /// Stream a session's feed from `read_id` onward. The session must be
    /// known; a dangling token gets `NotFound` and the transport closes.
    pub async fn handle_session_messages(
        &self,
        session_token: &str,
        read_id: u64,
    ) -> LinkerResult<Subscription> {
        self.session_client(session_token)?;
        self.relay.subscribe(session_token, read_id).await
    }

    /// Stream a wallet's feed from `read_id` onward.
    pub async fn handle_wallet_messages(
        &self,
        wallet_token: &str,
        read_id: u64,
    ) -> LinkerResult<Subscription> {
        if !self.wallet_tokens.validate(wallet_token) {
            return Err(LinkerError::NotFound);
        }
        self.relay.subscribe(wallet_token, read_id).await
    }

    /// Stop accepting subscriptions and cut live ones. Short-lived requests
    /// already in flight complete against their stores.
    pub async fn shutdown(&self) {
        self.relay.shutdown().await;
        info!("linker shut down");
    }
}
