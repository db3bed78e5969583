use chrono::{TimeZone, Utc};
use operator_console::push::TypingPayload;
use operator_console::reconciler::ConversationStore;
use operator_console::types::{ConversationPayload, Direction, Message};

fn message(id: &str, conversation: &str, secs: i64, direction: Direction, content: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation.to_string(),
        content: content.to_string(),
        direction,
        sender_id: None,
        sender_name: None,
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        has_media: false,
        media_type: None,
        media_caption: None,
        media_file_name: None,
        media_mime_type: None,
        status: None,
        external_id: None,
    }
}

fn conversation(id: &str, secs: i64) -> ConversationPayload {
    ConversationPayload {
        id: id.to_string(),
        contact_id: Some(format!("contact-{id}")),
        service_instance_id: Some("inst-1".to_string()),
        last_message_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
        ..Default::default()
    }
}

fn store_with(ids: &[(&str, i64)]) -> ConversationStore {
    let mut store = ConversationStore::new();
    store.replace_all(ids.iter().map(|(id, secs)| conversation(id, *secs)).collect());
    store
}

#[test]
fn test_repeated_ids_dedupe_and_last_wins() {
    let mut store = store_with(&[("c1", 0)]);
    store.activate("c1");
    let sequence = [("m1", "a"), ("m2", "b"), ("m1", "a2"), ("m3", "c"), ("m2", "b2"), ("m1", "a3")];
    for (i, (id, content)) in sequence.iter().enumerate() {
        store.add_message(message(id, "c1", 100 + i as i64, Direction::Inbound, content));
    }
    let timeline = store.messages();
    assert_eq!(timeline.len(), 3);
    let m1 = timeline.iter().find(|m| m.id == "m1").unwrap();
    assert_eq!(m1.content, "a3");
    let m2 = timeline.iter().find(|m| m.id == "m2").unwrap();
    assert_eq!(m2.content, "b2");
}

#[test]
fn test_timeline_sorted_regardless_of_arrival() {
    let mut store = store_with(&[("c1", 0)]);
    store.activate("c1");
    for (id, secs) in [("m3", 30), ("m1", 10), ("m4", 40), ("m2", 20)] {
        store.add_message(message(id, "c1", secs, Direction::Inbound, id));
    }
    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
    assert!(store
        .messages()
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn test_unread_counts_distinct_inbound_only() {
    let mut store = store_with(&[("c1", 0), ("c2", 0)]);
    store.activate("c2");
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "one"));
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "one again"));
    store.add_message(message("m2", "c1", 20, Direction::Outbound, "reply"));
    store.add_message(message("m3", "c1", 30, Direction::Inbound, "two"));
    let c1 = store.conversation("c1").unwrap();
    assert_eq!(c1.unread_count, 2);
    assert!(store.messages().is_empty());

    store.activate("c1");
    assert_eq!(store.conversation("c1").unwrap().unread_count, 0);
}

#[test]
fn test_message_while_active_keeps_unread_zero() {
    let mut store = store_with(&[("c1", 0)]);
    store.activate("c1");
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "hi"));
    assert_eq!(store.conversation("c1").unwrap().unread_count, 0);
    assert_eq!(store.messages().len(), 1);
}

#[test]
fn test_inactive_message_updates_summary_and_order() {
    let mut store = store_with(&[("c1", 100), ("c2", 50)]);
    store.add_message(message("m9", "c2", 200, Direction::Inbound, "ping"));
    let first = &store.conversations()[0];
    assert_eq!(first.id, "c2");
    assert_eq!(first.last_message_preview.as_deref(), Some("ping"));
    assert_eq!(first.last_customer_message_preview.as_deref(), Some("ping"));
    assert_eq!(first.last_message_direction, Some(Direction::Inbound));
}

#[test]
fn test_older_message_does_not_rewind_summary() {
    let mut store = store_with(&[("c1", 0)]);
    store.add_message(message("m2", "c1", 200, Direction::Inbound, "newer"));
    store.add_message(message("m1", "c1", 100, Direction::Inbound, "older"));
    let c1 = store.conversation("c1").unwrap();
    assert_eq!(c1.last_message_preview.as_deref(), Some("newer"));
    assert_eq!(c1.unread_count, 2);
}

#[test]
fn test_upsert_keeps_local_unread() {
    let mut store = store_with(&[("c1", 0)]);
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "hi"));
    let mut update = conversation("c1", 10);
    update.unread_count = Some(0);
    update.operator_name = Some("Ana".to_string());
    assert!(!store.upsert_conversation(update));
    let c1 = store.conversation("c1").unwrap();
    assert_eq!(c1.unread_count, 1);
    assert_eq!(c1.operator_name.as_deref(), Some("Ana"));
    assert_eq!(c1.contact_id, "contact-c1");
}

#[test]
fn test_upsert_new_conversation_sorted() {
    let mut store = store_with(&[("c1", 100)]);
    assert!(store.upsert_conversation(conversation("c2", 300)));
    assert_eq!(store.conversations()[0].id, "c2");
    assert_eq!(store.conversations().len(), 2);
}

#[test]
fn test_conversation_update_merges_active_timeline() {
    let mut store = store_with(&[("c1", 0)]);
    store.activate("c1");
    store.add_message(message("push-1", "c1", 50, Direction::Inbound, "from push"));

    let update: ConversationPayload = serde_json::from_value(serde_json::json!({
        "id": "c1",
        "messages": [
            {"id": "m1", "conversationId": "c1", "content": "older", "direction": "INBOUND", "createdAt": "1970-01-01T00:00:10Z"}
        ]
    }))
    .unwrap();
    store.apply_conversation_update(update);

    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "push-1"]);
}

#[test]
fn test_remove_active_clears_state() {
    let mut store = store_with(&[("c1", 0), ("c2", 0)]);
    store.activate("c1");
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "hi"));
    assert!(store.remove_conversation("c1"));
    assert!(store.active_id().is_none());
    assert!(store.messages().is_empty());
    assert!(!store.contains("c1"));
    assert!(!store.remove_conversation("c2"));
    assert!(!store.contains("c2"));
}

#[test]
fn test_set_messages_sorts_and_clears_unread() {
    let mut store = store_with(&[("c1", 0)]);
    store.add_message(message("m0", "c1", 5, Direction::Inbound, "unread"));
    store.set_messages(vec![
        message("m2", "c1", 20, Direction::Outbound, "second"),
        message("m1", "c1", 10, Direction::Inbound, "first"),
    ]);
    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    let c1 = store.conversation("c1").unwrap();
    assert_eq!(c1.unread_count, 0);
    assert_eq!(c1.last_message_preview.as_deref(), Some("second"));
}

#[test]
fn test_fetched_messages_do_not_count_as_unread() {
    let mut store = store_with(&[("c1", 0)]);
    store.merge_messages("c1", vec![message("m1", "c1", 10, Direction::Inbound, "old")]);
    store.add_message(message("m1", "c1", 10, Direction::Inbound, "old"));
    assert_eq!(store.conversation("c1").unwrap().unread_count, 0);
}

#[test]
fn test_presence_tracking() {
    let mut store = ConversationStore::new();
    store.set_online("u1", true);
    store.set_online("u2", true);
    store.set_online("u1", false);
    assert!(store.online_users().contains("u2"));
    assert!(!store.online_users().contains("u1"));

    store.set_typing(&TypingPayload {
        conversation_id: "c1".to_string(),
        user_id: None,
        user_name: Some("Bruno".to_string()),
        is_typing: true,
    });
    assert_eq!(store.typing_users("c1"), vec!["Bruno".to_string()]);
}
