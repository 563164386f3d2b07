//! Call routing: client → wallet requests and wallet → client results.
//!
//! A `Call` is immutable once created and expects exactly one outcome: a
//! `CallResult` with the matching `call_id` + `link_id`, or a caller-side
//! timeout. The coordinator itself imposes no deadline; giving up on an
//! unanswered call is the client's policy.

use crate::error::{LinkerError, LinkerResult};
use crate::linker::links::LinkTable;
use crate::relay::MessageRelay;
use crate::token::{ClientToken, WalletToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Answered call ids remembered for duplicate suppression.
const ANSWERED_MEMORY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub call_id: String,
    pub link_id: String,
    pub session_token: String,
    pub account: Option<String>,
    pub payload: Value,
    pub return_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub link_id: String,
    pub session_token: String,
    pub result: Value,
}

/// What travels on a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Call(Call),
    CallResult(CallResult),
}

impl FeedEvent {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Correlates outbound calls with their eventual results and deposits each
/// onto the right feed.
pub struct CallCoordinator {
    links: Arc<LinkTable>,
    relay: Arc<MessageRelay>,
    answered: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl CallCoordinator {
    pub fn new(links: Arc<LinkTable>, relay: Arc<MessageRelay>) -> Self {
        Self {
            links,
            relay,
            answered: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Fan a call out to every wallet linked to `client_token`. Returns once
    /// enqueued; delivery is asynchronous and the result arrives later on the
    /// session's own feed. Fails with `NotLinked` when the client holds no
    /// link at all.
    pub async fn call_wallet(
        &self,
        client_token: &ClientToken,
        session_token: &str,
        account: Option<String>,
        call_id: String,
        payload: Value,
        return_url: Option<String>,
    ) -> LinkerResult<bool> {
        let links = self.links.links_for_client(client_token)?;
        if links.is_empty() {
            return Err(LinkerError::NotLinked);
        }
        for link in links {
            let call = Call {
                call_id: call_id.clone(),
                link_id: link.link_id.clone(),
                session_token: session_token.to_string(),
                account: account.clone(),
                payload: payload.clone(),
                return_url: return_url.clone(),
                created_at: Utc::now(),
            };
            let seq = self
                .relay
                .post(link.wallet_token.as_str(), FeedEvent::Call(call).to_value())
                .await?;
            debug!(call_id = %call_id, link_id = %link.link_id, seq, "call enqueued for wallet");
        }
        Ok(true)
    }

    /// Deposit a wallet's result onto the originating session's feed. The
    /// link must still exist (false when unlinked mid-flight, a recoverable
    /// condition) and must belong to the calling wallet.
    pub async fn wallet_called(
        &self,
        wallet_token: &WalletToken,
        call_id: &str,
        link_id: &str,
        session_token: &str,
        result: Value,
    ) -> LinkerResult<bool> {
        let link = match self.links.get(link_id)? {
            Some(link) => link,
            None => {
                debug!(call_id, link_id, "result for a link that no longer exists");
                return Ok(false);
            }
        };
        if &link.wallet_token != wallet_token {
            return Err(LinkerError::Unauthorized);
        }

        let key = format!("{link_id}/{call_id}");
        {
            let mut answered = self.answered.lock().map_err(|_| LinkerError::lock("coordinator"))?;
            if !answered.0.insert(key.clone()) {
                debug!(call_id, link_id, "duplicate result suppressed");
                return Ok(false);
            }
            answered.1.push_back(key);
            while answered.1.len() > ANSWERED_MEMORY {
                if let Some(old) = answered.1.pop_front() {
                    answered.0.remove(&old);
                }
            }
        }

        let event = FeedEvent::CallResult(CallResult {
            call_id: call_id.to_string(),
            link_id: link_id.to_string(),
            session_token: session_token.to_string(),
            result,
        });
        let seq = self.relay.post(session_token, event.to_value()).await?;
        debug!(call_id, link_id, seq, "result enqueued for session");
        Ok(true)
    }
}
