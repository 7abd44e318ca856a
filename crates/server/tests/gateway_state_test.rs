use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskchat_server::bus::{BusEvent, Envelope, EventHandler, MembershipAction, Topic};
use taskchat_server::models::{ConversationType, Message, MessageType};
use taskchat_server::presence::PresenceCache;
use taskchat_server::ws::events::{encode_frame, Destination, ServerEvent};
use taskchat_server::ws::forwarder::GatewayForwarder;
use taskchat_server::ws::gateway::GatewayState;
use tokio::sync::mpsc;

fn make_tx() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
    mpsc::unbounded_channel()
}

fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        out.push(serde_json::from_str(&raw).unwrap());
    }
    out
}

fn typing(conversation_id: &str, user_id: &str) -> ServerEvent {
    ServerEvent::Typing {
        conversation_id: conversation_id.into(),
        user_id: user_id.into(),
        active: true,
    }
}

/// Register a client and end its catch-up phase.
async fn live_client(
    gw: &GatewayState,
    user_id: &str,
) -> (u64, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = make_tx();
    let cid = gw.next_client_id().await;
    gw.register(cid, user_id.into(), format!("session-{cid}"), tx)
        .await;
    gw.complete_sync(cid).await;
    (cid, rx)
}

#[test]
fn destination_strings() {
    assert_eq!(Destination::UserMessages("u1").to_string(), "user/u1/messages");
    assert_eq!(
        Destination::UserUnreadCounts("u1").to_string(),
        "user/u1/unread-counts"
    );
    assert_eq!(
        Destination::UserOfflineSync("u1").to_string(),
        "user/u1/offline-sync"
    );
    assert_eq!(Destination::UserReaction("u1").to_string(), "user/u1/reaction");
    assert_eq!(
        Destination::ConversationMessages("c1").to_string(),
        "conversation/c1/messages"
    );
    assert_eq!(
        Destination::ConversationTyping("c1").to_string(),
        "conversation/c1/typing"
    );
    assert_eq!(
        Destination::ConversationReaction("c1").to_string(),
        "conversation/c1/reaction"
    );
}

#[test]
fn frames_carry_destination() {
    let raw = encode_frame(Destination::ConversationTyping("c1"), &typing("c1", "u1")).unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["type"], "typing");
    assert_eq!(value["destination"], "conversation/c1/typing");
    assert_eq!(value["conversationId"], "c1");
    assert_eq!(value["userId"], "u1");
}

#[tokio::test]
async fn live_frames_buffered_until_sync_completes() {
    let gw = GatewayState::new();
    let (tx, mut rx) = make_tx();
    let cid = gw.next_client_id().await;
    gw.register(cid, "u1".into(), "s1".into(), tx).await;
    gw.subscribe_conversation(cid, "c1").await;

    gw.broadcast_conversation("c1", Destination::ConversationTyping("c1"), &typing("c1", "u2"), None)
        .await;
    // Direct replies bypass the buffer
    gw.send_to(cid, Destination::Session("s1"), &ServerEvent::Pong).await;

    let before = frames(&mut rx);
    assert_eq!(before.len(), 1);
    assert_eq!(before[0]["type"], "pong");

    assert_eq!(gw.complete_sync(cid).await, 1);
    let after = frames(&mut rx);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["type"], "typing");

    // Once live, frames go straight through
    gw.broadcast_conversation("c1", Destination::ConversationTyping("c1"), &typing("c1", "u2"), None)
        .await;
    assert_eq!(frames(&mut rx).len(), 1);
    assert_eq!(gw.complete_sync(cid).await, 0);
}

#[tokio::test]
async fn broadcast_reaches_subscribers_only() {
    let gw = GatewayState::new();
    let (c1, mut rx1) = live_client(&gw, "u1").await;
    let (_c2, mut rx2) = live_client(&gw, "u2").await;
    gw.subscribe_conversation(c1, "conv").await;

    gw.broadcast_conversation("conv", Destination::ConversationTyping("conv"), &typing("conv", "u3"), None)
        .await;

    assert_eq!(frames(&mut rx1).len(), 1);
    assert!(frames(&mut rx2).is_empty());
}

#[tokio::test]
async fn broadcast_can_exclude_a_user() {
    let gw = GatewayState::new();
    let (c1, mut rx1) = live_client(&gw, "u1").await;
    let (c2, mut rx2) = live_client(&gw, "u2").await;
    gw.subscribe_conversation(c1, "conv").await;
    gw.subscribe_conversation(c2, "conv").await;

    gw.broadcast_conversation(
        "conv",
        Destination::ConversationTyping("conv"),
        &typing("conv", "u1"),
        Some("u1"),
    )
    .await;

    assert!(frames(&mut rx1).is_empty());
    assert_eq!(frames(&mut rx2).len(), 1);
}

#[tokio::test]
async fn push_to_user_skips_connections_viewing_conversation() {
    let gw = GatewayState::new();
    let (viewing, mut rx_viewing) = live_client(&gw, "u1").await;
    let (_elsewhere, mut rx_elsewhere) = live_client(&gw, "u1").await;
    let (_other, mut rx_other) = live_client(&gw, "u2").await;
    gw.subscribe_conversation(viewing, "conv").await;

    gw.push_to_user("u1", Destination::UserMessages("u1"), &ServerEvent::Pong, Some("conv"))
        .await;

    assert!(frames(&mut rx_viewing).is_empty());
    assert_eq!(frames(&mut rx_elsewhere).len(), 1);
    assert!(frames(&mut rx_other).is_empty());
}

#[tokio::test]
async fn unregister_drops_subscriptions() {
    let gw = GatewayState::new();
    let (cid, _rx) = live_client(&gw, "u1").await;
    gw.subscribe_conversation(cid, "conv").await;
    assert!(gw.is_subscribed(cid, "conv").await);

    let client = gw.unregister(cid).await.unwrap();
    assert_eq!(client.user_id, "u1");
    assert!(!gw.is_subscribed(cid, "conv").await);
    assert!(gw.conversation_subs.read().await.is_empty());
    assert_eq!(gw.connection_count().await, 0);
}

#[tokio::test]
async fn unsubscribe_user_covers_every_connection() {
    let gw = GatewayState::new();
    let (a, _rx_a) = live_client(&gw, "u1").await;
    let (b, _rx_b) = live_client(&gw, "u1").await;
    gw.subscribe_conversation(a, "conv").await;
    gw.subscribe_conversation(b, "conv").await;

    gw.unsubscribe_user("u1", "conv").await;

    assert!(!gw.is_subscribed(a, "conv").await);
    assert!(!gw.is_subscribed(b, "conv").await);
    assert_eq!(gw.client_ids_for_user("u1").await.len(), 2);
}

// ── Forwarder ──

fn message(id: i64, conversation_id: &str, sender_id: &str) -> Message {
    Message {
        id,
        conversation_id: conversation_id.into(),
        sender_id: sender_id.into(),
        message_type: MessageType::Text,
        content: "hello".into(),
        file_key: None,
        file_url: None,
        reply_to_id: None,
        is_edited: false,
        is_deleted: false,
        created_at: "2026-01-01T00:00:00.000000Z".into(),
        updated_at: "2026-01-01T00:00:00.000000Z".into(),
    }
}

fn message_sent(conversation_id: &str, sender_id: &str, recipients: &[&str]) -> Envelope {
    Envelope::new(
        Topic::Group,
        conversation_id,
        BusEvent::MessageSent {
            conversation_type: ConversationType::Group,
            message: message(7, conversation_id, sender_id),
            recipient_ids: recipients.iter().map(|s| s.to_string()).collect(),
        },
    )
}

fn forwarder(gw: &Arc<GatewayState>) -> (GatewayForwarder, Arc<PresenceCache>) {
    let presence = Arc::new(PresenceCache::in_memory(Duration::from_secs(90)));
    (GatewayForwarder::new(gw.clone(), presence.clone()), presence)
}

#[tokio::test]
async fn message_goes_to_viewers_and_online_recipients() {
    let gw = Arc::new(GatewayState::new());
    let (fwd, presence) = forwarder(&gw);
    let (viewer, mut rx_viewer) = live_client(&gw, "bob").await;
    let (_away, mut rx_away) = live_client(&gw, "carol").await;
    gw.subscribe_conversation(viewer, "conv").await;
    presence.connect("bob", "sb").await.unwrap();
    presence.connect("carol", "sc").await.unwrap();
    presence.bump_unread("carol", "conv").await;

    fwd.handle(&message_sent("conv", "alice", &["bob", "carol"]))
        .await
        .unwrap();

    // Viewer gets the conversation frame once, not a second copy on the user channel
    let bob_frames = frames(&mut rx_viewer);
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(bob_frames[0]["destination"], "conversation/conv/messages");
    assert_eq!(bob_frames[0]["message"]["id"], 7);

    let carol_frames = frames(&mut rx_away);
    assert_eq!(carol_frames.len(), 2);
    assert_eq!(carol_frames[0]["destination"], "user/carol/messages");
    assert_eq!(carol_frames[1]["type"], "unread_count");
    assert_eq!(carol_frames[1]["count"], 1);
}

#[tokio::test]
async fn offline_recipients_get_no_user_push() {
    let gw = Arc::new(GatewayState::new());
    let (fwd, _presence) = forwarder(&gw);
    let (_cid, mut rx) = live_client(&gw, "carol").await;

    fwd.handle(&message_sent("conv", "alice", &["carol"]))
        .await
        .unwrap();

    assert!(frames(&mut rx).is_empty());
}

#[tokio::test]
async fn removal_unsubscribes_member() {
    let gw = Arc::new(GatewayState::new());
    let (fwd, _presence) = forwarder(&gw);
    let (removed, mut rx_removed) = live_client(&gw, "bob").await;
    let (staying, mut rx_staying) = live_client(&gw, "alice").await;
    gw.subscribe_conversation(removed, "conv").await;
    gw.subscribe_conversation(staying, "conv").await;

    let envelope = Envelope::new(
        Topic::Group,
        "conv",
        BusEvent::MembershipChanged {
            conversation_id: "conv".into(),
            user_id: "bob".into(),
            actor_id: "alice".into(),
            action: MembershipAction::Removed,
        },
    );
    fwd.handle(&envelope).await.unwrap();

    assert!(!gw.is_subscribed(removed, "conv").await);
    let bob_frames = frames(&mut rx_removed);
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(bob_frames[0]["destination"], "user/bob/messages");
    assert_eq!(bob_frames[0]["action"], "REMOVED");
    assert_eq!(frames(&mut rx_staying).len(), 1);

    // Later conversation traffic no longer reaches the removed member
    fwd.handle(&message_sent("conv", "alice", &[])).await.unwrap();
    assert!(frames(&mut rx_removed).is_empty());
}

#[tokio::test]
async fn typing_skips_the_typist() {
    let gw = Arc::new(GatewayState::new());
    let (fwd, _presence) = forwarder(&gw);
    let (a, mut rx_a) = live_client(&gw, "alice").await;
    let (b, mut rx_b) = live_client(&gw, "bob").await;
    gw.subscribe_conversation(a, "conv").await;
    gw.subscribe_conversation(b, "conv").await;

    let envelope = Envelope::new(
        Topic::TypingStatus,
        "conv",
        BusEvent::Typing {
            conversation_id: "conv".into(),
            user_id: "alice".into(),
            active: true,
        },
    );
    fwd.handle(&envelope).await.unwrap();

    assert!(frames(&mut rx_a).is_empty());
    let bob_frames = frames(&mut rx_b);
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(bob_frames[0]["destination"], "conversation/conv/typing");
}

#[tokio::test]
async fn presence_reaches_everyone() {
    let gw = Arc::new(GatewayState::new());
    let (fwd, _presence) = forwarder(&gw);
    let (_a, mut rx_a) = live_client(&gw, "alice").await;
    let (_b, mut rx_b) = live_client(&gw, "bob").await;

    let envelope = Envelope::new(
        Topic::OnlineStatus,
        "alice",
        BusEvent::Presence {
            user_id: "alice".into(),
            online: false,
        },
    );
    fwd.handle(&envelope).await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let got = frames(rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "presence");
        assert_eq!(got[0]["online"], false);
    }
}

#[tokio::test]
async fn subscribe_after_unregister_leaves_no_subscription() {
    let gw = GatewayState::new();
    let (tx, _rx) = make_tx();
    let cid = gw.next_client_id().await;
    gw.register(cid, "u1".into(), "s1".into(), tx).await;
    assert!(gw.is_registered(cid).await);

    gw.unregister(cid).await;
    assert!(!gw.is_registered(cid).await);

    // A join that finishes after the socket closed
    assert!(!gw.subscribe_conversation(cid, "conv").await);
    assert!(!gw.conversation_subs.read().await.contains_key("conv"));

    let never_registered = gw.next_client_id().await;
    assert!(!gw.subscribe_conversation(never_registered, "conv").await);
    assert!(gw.conversation_subs.read().await.is_empty());
}

#[tokio::test]
async fn unregister_clears_subscriptions_made_while_registered() {
    let gw = GatewayState::new();
    let (tx, _rx) = make_tx();
    let cid = gw.next_client_id().await;
    gw.register(cid, "u1".into(), "s1".into(), tx).await;
    assert!(gw.subscribe_conversation(cid, "a").await);
    assert!(gw.subscribe_conversation(cid, "b").await);

    gw.unregister(cid).await;
    assert!(gw.conversation_subs.read().await.is_empty());
}
