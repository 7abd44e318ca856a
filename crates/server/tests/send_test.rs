mod common;

use std::sync::Arc;

use taskchat_server::bus::{BusEvent, Topic};
use taskchat_server::db;
use taskchat_server::error::ChatError;
use taskchat_server::models::{MessageType, SendMessageRequest};

use common::*;

struct Group {
    id: String,
    alice: String,
    bob: String,
    carol: String,
}

async fn group_of_three(pool: &sqlx::SqlitePool, t: &TestCoordinator) -> Group {
    let (alice, _) = create_test_user(pool, "alice").await;
    let (bob, _) = create_test_user(pool, "bob").await;
    let (carol, _) = create_test_user(pool, "carol").await;
    let group = t
        .coordinator
        .create_group(&alice, group_request("Project", &[&bob, &carol]))
        .await
        .unwrap();
    t.publisher.clear();
    Group {
        id: group.id,
        alice,
        bob,
        carol,
    }
}

#[tokio::test]
async fn test_send_creates_one_status_row_per_member() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let msg = t.coordinator.send(&g.alice, &g.id, text("hi")).await.unwrap();

    assert_eq!(read_status_rows(&pool, msg.id).await, 3);
    assert_eq!(status_of(&pool, msg.id, &g.alice).await.as_deref(), Some("READ"));
    assert_eq!(status_of(&pool, msg.id, &g.bob).await.as_deref(), Some("SENT"));
    assert_eq!(status_of(&pool, msg.id, &g.carol).await.as_deref(), Some("SENT"));
}

#[tokio::test]
async fn test_send_bumps_conversation_updated_at() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let before = db::conversations::find_conversation(&pool, &g.id)
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let msg = t.coordinator.send(&g.alice, &g.id, text("hi")).await.unwrap();

    let after = db::conversations::find_conversation(&pool, &g.id)
        .await
        .unwrap()
        .unwrap();
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.updated_at, msg.created_at);
}

#[tokio::test]
async fn test_send_publishes_single_event_keyed_by_conversation() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let msg = t.coordinator.send(&g.alice, &g.id, text("hi")).await.unwrap();

    let events = t.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, Topic::Group);
    assert_eq!(events[0].key, g.id);
    match &events[0].event {
        BusEvent::MessageSent {
            message,
            recipient_ids,
            ..
        } => {
            assert_eq!(message.id, msg.id);
            let mut recipients = recipient_ids.clone();
            recipients.sort();
            let mut expected = vec![g.bob.clone(), g.carol.clone()];
            expected.sort();
            assert_eq!(recipients, expected);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_send_bumps_unread_for_recipients_only() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    t.coordinator.send(&g.alice, &g.id, text("one")).await.unwrap();
    t.coordinator.send(&g.alice, &g.id, text("two")).await.unwrap();

    // The creation notice counts too
    assert_eq!(t.presence.unread(&g.bob, &g.id).await, Some(3));
    assert_eq!(t.presence.unread(&g.carol, &g.id).await, Some(3));
    assert_eq!(t.presence.unread(&g.alice, &g.id).await, None);
}

#[tokio::test]
async fn test_direct_message_uses_direct_topic() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let (alice, _) = create_test_user(&pool, "alice").await;
    let (bob, _) = create_test_user(&pool, "bob").await;

    let msg = t.coordinator.send_direct(&alice, &bob, text("hey")).await.unwrap();

    let events = t.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, Topic::Direct);
    assert_eq!(events[0].key, msg.conversation_id);
    assert_eq!(read_status_rows(&pool, msg.id).await, 2);
}

#[tokio::test]
async fn test_send_rejects_non_member() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let (mallory, _) = create_test_user(&pool, "mallory").await;

    let err = t.coordinator.send(&mallory, &g.id, text("let me in")).await.unwrap_err();
    assert!(matches!(err, ChatError::NotMember));
    assert!(t.publisher.events().is_empty());
}

#[tokio::test]
async fn test_send_rejects_inactive_member() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    t.coordinator.remove_member(&g.carol, &g.id, &g.carol).await.unwrap();
    t.publisher.clear();

    let err = t.coordinator.send(&g.carol, &g.id, text("still here?")).await.unwrap_err();
    assert!(matches!(err, ChatError::InactiveMember));
    assert!(t.publisher.events().is_empty());
}

#[tokio::test]
async fn test_send_to_unknown_conversation() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let (alice, _) = create_test_user(&pool, "alice").await;

    let err = t.coordinator.send(&alice, "nope", text("hello?")).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn test_reply_must_target_live_message_in_same_conversation() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let elsewhere = t
        .coordinator
        .create_group(&g.alice, group_request("Other", &[&g.bob]))
        .await
        .unwrap();
    let foreign = t
        .coordinator
        .send(&g.alice, &elsewhere.id, text("over here"))
        .await
        .unwrap();

    let err = t
        .coordinator
        .send(&g.alice, &g.id, reply("re", foreign.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidReply(_)));

    let err = t
        .coordinator
        .send(&g.alice, &g.id, reply("re", 99_999))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidReply(_)));

    let original = t.coordinator.send(&g.bob, &g.id, text("oops")).await.unwrap();
    t.coordinator.delete_message(&g.bob, original.id).await.unwrap();
    let err = t
        .coordinator
        .send(&g.alice, &g.id, reply("re", original.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidReply(_)));
}

#[tokio::test]
async fn test_reply_in_same_conversation() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let original = t.coordinator.send(&g.bob, &g.id, text("question")).await.unwrap();
    let answer = t
        .coordinator
        .send(&g.alice, &g.id, reply("answer", original.id))
        .await
        .unwrap();
    assert_eq!(answer.reply_to_id, Some(original.id));
}

#[tokio::test]
async fn test_send_validates_content() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let err = t.coordinator.send(&g.alice, &g.id, text("   ")).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let long = "x".repeat(4001);
    let err = t.coordinator.send(&g.alice, &g.id, text(&long)).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let system = SendMessageRequest {
        message_type: MessageType::System,
        ..text("I am the system")
    };
    let err = t.coordinator.send(&g.alice, &g.id, system).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn test_send_succeeds_when_bus_is_down() {
    let pool = setup_test_db().await;
    let (coordinator, _) = coordinator_with(&pool, Arc::new(FailingPublisher), Arc::new(StaticBlobs));
    let (alice, _) = create_test_user(&pool, "alice").await;
    let (bob, _) = create_test_user(&pool, "bob").await;
    let group = coordinator
        .create_group(&alice, group_request("Offline bus", &[&bob]))
        .await
        .unwrap();

    let msg = coordinator.send(&alice, &group.id, text("durable")).await.unwrap();

    let stored = db::messages::find_message(&pool, msg.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "durable");
    assert_eq!(status_of(&pool, msg.id, &bob).await.as_deref(), Some("SENT"));
}

#[tokio::test]
async fn test_file_message_gets_download_link() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let request = SendMessageRequest {
        content: "quarterly numbers".into(),
        message_type: MessageType::File,
        reply_to_id: None,
        file_key: Some("docs/report.pdf".into()),
    };
    let msg = t.coordinator.send(&g.alice, &g.id, request).await.unwrap();
    assert_eq!(
        msg.file_url.as_deref(),
        Some("https://cdn.test/docs/report.pdf?sig=fresh")
    );

    // Link generation down: the cached link is served
    let (offline, _) = coordinator_with(&pool, Arc::new(RecordingPublisher::default()), Arc::new(FailingBlobs));
    let page = offline.list_messages(&g.bob, &g.id, None, None).await.unwrap();
    let file = page.items.iter().find(|m| m.id == msg.id).unwrap();
    assert_eq!(
        file.file_url.as_deref(),
        Some("https://cdn.test/docs/report.pdf?sig=fresh")
    );
}

#[tokio::test]
async fn test_file_message_requires_key() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;

    let request = SendMessageRequest {
        content: String::new(),
        message_type: MessageType::File,
        reply_to_id: None,
        file_key: Some("../etc/passwd".into()),
    };
    let err = t.coordinator.send(&g.alice, &g.id, request).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn test_edit_own_message() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let msg = t.coordinator.send(&g.alice, &g.id, text("helo")).await.unwrap();
    t.publisher.clear();

    let edited = t.coordinator.edit_message(&g.alice, msg.id, "hello").await.unwrap();
    assert_eq!(edited.content, "hello");
    assert!(edited.is_edited);
    assert_eq!(t.publisher.named("MESSAGE_UPDATED").len(), 1);

    let err = t.coordinator.edit_message(&g.bob, msg.id, "hijack").await.unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_delete_hides_content_and_is_idempotent() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let msg = t.coordinator.send(&g.alice, &g.id, text("secret")).await.unwrap();
    t.publisher.clear();

    t.coordinator.delete_message(&g.alice, msg.id).await.unwrap();
    t.coordinator.delete_message(&g.alice, msg.id).await.unwrap();
    assert_eq!(t.publisher.named("MESSAGE_DELETED").len(), 1);

    let page = t.coordinator.list_messages(&g.bob, &g.id, None, None).await.unwrap();
    let deleted = page.items.iter().find(|m| m.id == msg.id).unwrap();
    assert!(deleted.is_deleted);
    assert!(deleted.content.is_empty());

    let err = t.coordinator.edit_message(&g.alice, msg.id, "back").await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn test_list_messages_pages_backwards() {
    let pool = setup_test_db().await;
    let t = test_coordinator(&pool);
    let g = group_of_three(&pool, &t).await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let msg = t
            .coordinator
            .send(&g.alice, &g.id, text(&format!("msg {i}")))
            .await
            .unwrap();
        ids.push(msg.id);
    }

    let first = t.coordinator.list_messages(&g.bob, &g.id, None, Some(2)).await.unwrap();
    assert!(first.has_more);
    assert_eq!(first.items.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..].to_vec());
    assert_eq!(first.cursor, Some(ids[3]));

    let second = t
        .coordinator
        .list_messages(&g.bob, &g.id, first.cursor, Some(2))
        .await
        .unwrap();
    assert_eq!(second.items.iter().map(|m| m.id).collect::<Vec<_>>(), ids[1..3].to_vec());

    // Two sends left plus the creation notice
    let rest = t
        .coordinator
        .list_messages(&g.bob, &g.id, second.cursor, Some(10))
        .await
        .unwrap();
    assert!(!rest.has_more);
    assert_eq!(rest.cursor, None);
    assert_eq!(rest.items.len(), 2);
    assert_eq!(rest.items[0].message_type, MessageType::System);
    assert_eq!(rest.items[1].id, ids[0]);
}
