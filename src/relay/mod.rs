//! Per-recipient ordered message feeds with backlog replay and live tailing.
//!
//! Each recipient token owns an append-only feed. Sequence ids start at 1 and
//! are strictly increasing per feed, never reused. A subscriber resuming from
//! `read_id` first receives every retained message with `seq > read_id` in
//! order, then live-tails new posts until it closes or is displaced.
//!
//! At most one live subscriber per recipient: a second subscribe displaces the
//! first (its channel closes), so a client reconnecting from a new network
//! interface supersedes the stale connection rather than being rejected.
//!
//! Backlog retention is bounded by count (`backlog_cap`): already-delivered
//! messages stay replayable until evicted by newer ones, so a reconnect from a
//! recent read id sees no gaps.

use crate::error::{LinkerError, LinkerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One unit on a feed: opaque payload plus its per-recipient sequence id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMessage {
    pub seq: u64,
    pub payload: Value,
}

struct LiveTail {
    epoch: u64,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Default)]
struct Feed {
    next_seq: u64,
    backlog: VecDeque<FeedMessage>,
    live: Option<LiveTail>,
}

type SharedFeed = Arc<tokio::sync::Mutex<Feed>>;

/// Keyed store of feeds. The outer map lock is held only for lookup/insert;
/// each feed serializes its own mutation, so one busy recipient never stalls
/// another.
pub struct MessageRelay {
    feeds: Mutex<HashMap<String, SharedFeed>>,
    backlog_cap: usize,
    epochs: AtomicU64,
    accepting: AtomicBool,
}

impl MessageRelay {
    pub fn new(backlog_cap: usize) -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            backlog_cap: backlog_cap.max(1),
            epochs: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    fn feed(&self, recipient: &str) -> LinkerResult<SharedFeed> {
        let mut feeds = self.feeds.lock().map_err(|_| LinkerError::lock("relay"))?;
        Ok(feeds.entry(recipient.to_string()).or_default().clone())
    }

    /// Append a message to `recipient`'s feed and return its sequence id.
    /// Pushed immediately to a live subscriber when one is attached; otherwise
    /// it waits in backlog.
    pub async fn post(&self, recipient: &str, payload: Value) -> LinkerResult<u64> {
        let feed = self.feed(recipient)?;
        let mut feed = feed.lock().await;

        feed.next_seq += 1;
        let msg = FeedMessage { seq: feed.next_seq, payload };

        feed.backlog.push_back(msg.clone());
        while feed.backlog.len() > self.backlog_cap {
            feed.backlog.pop_front();
        }

        if let Some(live) = &feed.live {
            if live.tx.send(msg.clone()).is_err() {
                // Receiver went away without closing; free the slot.
                feed.live = None;
            }
        }
        Ok(msg.seq)
    }

    /// Attach a subscriber resuming from `from_seq`. Retained backlog beyond
    /// `from_seq` is queued before the subscription is returned, so no post
    /// can slip between replay and live tailing.
    pub async fn subscribe(&self, recipient: &str, from_seq: u64) -> LinkerResult<Subscription> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(LinkerError::Storage("relay shutting down".into()));
        }
        let feed = self.feed(recipient)?;
        let mut guard = feed.lock().await;

        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        for msg in guard.backlog.iter().filter(|m| m.seq > from_seq) {
            // Unbounded send to our own fresh channel cannot fail here.
            let _ = tx.send(msg.clone());
        }

        // Installing the new sender drops any previous one, ending the
        // displaced subscriber's stream.
        guard.live = Some(LiveTail { epoch, tx });
        drop(guard);

        Ok(Subscription { epoch, rx, feed })
    }

    /// Stop accepting subscriptions and cut every live tail. Backlogs are
    /// kept; a restart-free drain is not attempted.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let feeds: Vec<SharedFeed> = match self.feeds.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for feed in feeds {
            feed.lock().await.live = None;
        }
    }
}

/// Handle to one live subscription. Dropping it without `close` is safe (the
/// relay notices the dead channel on the next post); closing releases the
/// live slot promptly so a re-subscribe is never rejected as a duplicate.
pub struct Subscription {
    epoch: u64,
    rx: mpsc::UnboundedReceiver<FeedMessage>,
    feed: SharedFeed,
}

impl Subscription {
    /// Next message in sequence order. `None` once displaced by a newer
    /// subscriber or after relay shutdown.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }

    /// Release the live slot. A no-op when a newer subscriber has already
    /// displaced this one, so a stale close cannot kill its successor.
    pub async fn close(self) {
        let mut feed = self.feed.lock().await;
        if feed.live.as_ref().map(|l| l.epoch) == Some(self.epoch) {
            feed.live = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_ids_start_at_one_and_increment() {
        let relay = MessageRelay::new(16);
        assert_eq!(relay.post("r", json!("a")).await.unwrap(), 1);
        assert_eq!(relay.post("r", json!("b")).await.unwrap(), 2);
        assert_eq!(relay.post("other", json!("c")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn backlog_capped_by_count() {
        let relay = MessageRelay::new(2);
        for i in 0..5 {
            relay.post("r", json!(i)).await.unwrap();
        }
        let mut sub = relay.subscribe("r", 0).await.unwrap();
        // Only the two newest survive; ids stay monotonic with no reuse.
        assert_eq!(sub.next().await.unwrap().seq, 4);
        assert_eq!(sub.next().await.unwrap().seq, 5);
    }

    #[tokio::test]
    async fn close_releases_live_slot() {
        let relay = MessageRelay::new(16);
        let sub = relay.subscribe("r", 0).await.unwrap();
        sub.close().await;
        let mut again = relay.subscribe("r", 0).await.unwrap();
        relay.post("r", json!("x")).await.unwrap();
        assert_eq!(again.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_subscriptions() {
        let relay = MessageRelay::new(16);
        let mut sub = relay.subscribe("r", 0).await.unwrap();
        relay.shutdown().await;
        assert!(sub.next().await.is_none());
        assert!(relay.subscribe("r", 0).await.is_err());
    }
}
