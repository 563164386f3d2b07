//! Durable table of established client⇄wallet links.

use crate::error::{LinkerError, LinkerResult};
use crate::token::{ClientToken, WalletToken};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// One established pairing. `link_id` identifies exactly one
/// (client, wallet) relationship; re-linking the same pair updates the
/// record in place rather than duplicating it.
#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub link_id: String,
    pub client_token: ClientToken,
    pub wallet_token: WalletToken,
    pub app_info: Value,
    pub linked_at: DateTime<Utc>,
    pub current_rpc: Option<String>,
    pub current_accounts: Vec<String>,
}

/// Keyed by link id. A client may hold links to several wallets and a wallet
/// to several clients; per-token views are scans, cheap at the fanout sizes
/// involved (a handful of devices per identity).
pub struct LinkTable {
    links: Mutex<HashMap<String, Link>>,
}

impl Default for LinkTable {
    fn default() -> Self { Self::new() }
}

impl LinkTable {
    pub fn new() -> Self {
        Self { links: Mutex::new(HashMap::new()) }
    }

    /// Create the link, or refresh `current_rpc`/`current_accounts`/
    /// `linked_at` when the (client, wallet) pair is already linked. The
    /// existing link id survives a re-link; `link_id` is only used for a new
    /// record.
    pub fn upsert(
        &self,
        link_id: String,
        client_token: ClientToken,
        wallet_token: WalletToken,
        app_info: Value,
        current_rpc: Option<String>,
        current_accounts: Vec<String>,
    ) -> LinkerResult<Link> {
        let mut links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        let now = Utc::now();

        if let Some(existing) = links
            .values_mut()
            .find(|l| l.client_token == client_token && l.wallet_token == wallet_token)
        {
            existing.current_rpc = current_rpc;
            existing.current_accounts = current_accounts;
            existing.linked_at = now;
            return Ok(existing.clone());
        }

        let link = Link {
            link_id: link_id.clone(),
            client_token,
            wallet_token,
            app_info,
            linked_at: now,
            current_rpc,
            current_accounts,
        };
        links.insert(link_id, link.clone());
        Ok(link)
    }

    pub fn get(&self, link_id: &str) -> LinkerResult<Option<Link>> {
        let links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        Ok(links.get(link_id).cloned())
    }

    pub fn links_for_client(&self, client_token: &ClientToken) -> LinkerResult<Vec<Link>> {
        let links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        Ok(links.values().filter(|l| &l.client_token == client_token).cloned().collect())
    }

    /// All links for a wallet, most recent first. Used by a wallet to show
    /// its paired apps.
    pub fn wallet_links(&self, wallet_token: &WalletToken) -> LinkerResult<Vec<Link>> {
        let links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        let mut out: Vec<Link> = links
            .values()
            .filter(|l| &l.wallet_token == wallet_token)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.linked_at.cmp(&a.linked_at));
        Ok(out)
    }

    /// Remove every link held by `client_token`. Returns how many went away.
    pub fn unlink_client(&self, client_token: &ClientToken) -> LinkerResult<usize> {
        let mut links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        let before = links.len();
        links.retain(|_, l| &l.client_token != client_token);
        Ok(before - links.len())
    }

    /// Remove one link, checking ownership rather than mere existence: a
    /// wallet cannot unlink a pairing it is not party to.
    pub fn unlink_wallet(&self, wallet_token: &WalletToken, link_id: &str) -> LinkerResult<()> {
        let mut links = self.links.lock().map_err(|_| LinkerError::lock("link table"))?;
        match links.get(link_id) {
            None => Err(LinkerError::NotFound),
            Some(l) if &l.wallet_token != wallet_token => Err(LinkerError::Unauthorized),
            Some(_) => {
                links.remove(link_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_with_link(link_id: &str, client: &str, wallet: &str) -> LinkTable {
        let table = LinkTable::new();
        table
            .upsert(
                link_id.into(),
                ClientToken(client.into()),
                WalletToken(wallet.into()),
                json!({}),
                None,
                vec![],
            )
            .unwrap();
        table
    }

    #[test]
    fn relink_same_pair_updates_in_place() {
        let table = table_with_link("lk1", "c1", "w1");
        let updated = table
            .upsert(
                "lk2".into(),
                ClientToken("c1".into()),
                WalletToken("w1".into()),
                json!({}),
                Some("https://rpc.example".into()),
                vec!["0xabc".into()],
            )
            .unwrap();
        assert_eq!(updated.link_id, "lk1");
        assert_eq!(updated.current_accounts, vec!["0xabc".to_string()]);
        assert!(table.get("lk2").unwrap().is_none());
    }

    #[test]
    fn unlink_wallet_checks_ownership() {
        let table = table_with_link("lk1", "c1", "w1");
        let err = table
            .unlink_wallet(&WalletToken("w2".into()), "lk1")
            .unwrap_err();
        assert_eq!(err, LinkerError::Unauthorized);
        assert!(table.get("lk1").unwrap().is_some());
        table.unlink_wallet(&WalletToken("w1".into()), "lk1").unwrap();
        assert!(table.get("lk1").unwrap().is_none());
    }

    #[test]
    fn unlink_client_removes_all() {
        let table = table_with_link("lk1", "c1", "w1");
        table
            .upsert(
                "lk2".into(),
                ClientToken("c1".into()),
                WalletToken("w2".into()),
                json!({}),
                None,
                vec![],
            )
            .unwrap();
        assert_eq!(table.unlink_client(&ClientToken("c1".into())).unwrap(), 2);
        assert!(table.links_for_client(&ClientToken("c1".into())).unwrap().is_empty());
    }
}
