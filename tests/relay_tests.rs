//! Feed ordering, replay, and displacement properties of the message relay.

use linkrelay::MessageRelay;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

async fn expect_none(sub: &mut linkrelay::Subscription) {
    assert!(
        timeout(Duration::from_millis(100), sub.next()).await.is_err(),
        "expected no message on this feed"
    );
}

#[tokio::test]
async fn replay_from_read_id_then_live_tail() {
    let relay = MessageRelay::new(64);
    for i in 1..=5 {
        let seq = relay.post("alice", json!({"n": i})).await.unwrap();
        assert_eq!(seq, i);
    }

    // Resuming from read id 2 yields exactly 3..5 in order.
    let mut sub = relay.subscribe("alice", 2).await.unwrap();
    for expected in 3..=5 {
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.seq, expected);
        assert_eq!(msg.payload["n"], expected);
    }

    // Then live posts, still in order, no gaps.
    relay.post("alice", json!({"n": 6})).await.unwrap();
    assert_eq!(sub.next().await.unwrap().seq, 6);
    expect_none(&mut sub).await;
}

#[tokio::test]
async fn resume_after_close_sees_no_duplicates() {
    let relay = MessageRelay::new(64);
    for i in 1..=3 {
        relay.post("alice", json!(i)).await.unwrap();
    }

    let mut sub = relay.subscribe("alice", 0).await.unwrap();
    let mut last = 0;
    for _ in 0..3 {
        last = sub.next().await.unwrap().seq;
    }
    assert_eq!(last, 3);
    sub.close().await;

    // Reconnect from the last acknowledged id: only new traffic arrives.
    let mut again = relay.subscribe("alice", last).await.unwrap();
    relay.post("alice", json!(4)).await.unwrap();
    assert_eq!(again.next().await.unwrap().seq, 4);
    expect_none(&mut again).await;
}

#[tokio::test]
async fn second_subscriber_displaces_first() {
    let relay = MessageRelay::new(64);
    let mut stale = relay.subscribe("alice", 0).await.unwrap();
    let mut fresh = relay.subscribe("alice", 0).await.unwrap();

    // The stale stream ends rather than the fresh one being rejected.
    assert!(stale.next().await.is_none());

    relay.post("alice", json!("hello")).await.unwrap();
    assert_eq!(fresh.next().await.unwrap().seq, 1);

    // A stale close must not kill the successor.
    stale.close().await;
    relay.post("alice", json!("again")).await.unwrap();
    assert_eq!(fresh.next().await.unwrap().seq, 2);
}

#[tokio::test]
async fn recipients_are_independent() {
    let relay = MessageRelay::new(64);
    relay.post("alice", json!("a1")).await.unwrap();
    relay.post("bob", json!("b1")).await.unwrap();
    relay.post("alice", json!("a2")).await.unwrap();

    let mut alice = relay.subscribe("alice", 0).await.unwrap();
    let mut bob = relay.subscribe("bob", 0).await.unwrap();

    assert_eq!(alice.next().await.unwrap().payload, json!("a1"));
    assert_eq!(alice.next().await.unwrap().payload, json!("a2"));
    let b = bob.next().await.unwrap();
    assert_eq!(b.seq, 1);
    assert_eq!(b.payload, json!("b1"));
    expect_none(&mut bob).await;
}

#[tokio::test]
async fn live_delivery_without_backlog_wait() {
    let relay = MessageRelay::new(64);
    let mut sub = relay.subscribe("alice", 0).await.unwrap();

    let post = {
        let payload = json!({"live": true});
        relay.post("alice", payload).await.unwrap()
    };
    assert_eq!(post, 1);
    let msg = sub.next().await.unwrap();
    assert_eq!(msg.seq, 1);
    assert_eq!(msg.payload["live"], true);
}
