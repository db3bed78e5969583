mod common;

use common::{api_config, conversation_json, harness_with, message_json, signed_in, tokens};
use operator_console::push::{ClosedPayload, PushCommand, PushCommands, PushEvent};
use operator_console::reconciler::Reconciler;
use operator_console::types::{normalize_message, MessagePayload};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reconciler(server: &MockServer) -> (Arc<Reconciler>, mpsc::UnboundedReceiver<PushCommand>) {
    let h = signed_in(server, "token", "refresh");
    let (tx, rx) = mpsc::unbounded_channel();
    let reconciler = Reconciler::new(h.api.clone(), Some(PushCommands::new(tx)), 50, 100);
    (Arc::new(reconciler), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PushCommand>) -> Vec<PushCommand> {
    let mut commands = Vec::new();
    while let Ok(command) = rx.try_recv() {
        commands.push(command);
    }
    commands
}

fn pushed(id: &str, conversation: &str, at: &str, direction: &str) -> MessagePayload {
    serde_json::from_value(message_json(id, conversation, at, direction, &format!("text {id}"))).unwrap()
}

async fn mount_list(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                conversation_json("c1", "2024-05-01T09:00:00Z"),
                conversation_json("c2", "2024-05-01T11:00:00Z"),
                conversation_json("c3", "2024-05-01T10:00:00Z")
            ],
            "meta": {"total": 3, "page": 1, "limit": 50, "totalPages": 1}
        })))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, id: &str, messages: serde_json::Value, delay_ms: u64) {
    let mut body = conversation_json(id, "2024-05-01T09:00:00Z");
    body["messages"] = messages;
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{id}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body)
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(server)
        .await;
}

async fn mount_messages(server: &MockServer, id: &str, messages: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/messages/conversation/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(messages))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_conversations_sorted_by_recency() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    let (reconciler, _rx) = reconciler(&server);

    let list = reconciler.load_conversations().await.unwrap();
    let ids: Vec<&str> = list.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c2", "c3", "c1"]);
}

#[tokio::test]
async fn test_select_fetches_detail_and_joins_room() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(
        &server,
        "c1",
        json!([
            message_json("m2", "c1", "2024-05-01T09:00:00Z", "OUTBOUND", "reply"),
            message_json("m1", "c1", "2024-05-01T08:59:00Z", "INBOUND", "question")
        ]),
        0,
    )
    .await;
    let (reconciler, mut rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();

    let active = reconciler.select_conversation("c1").await.unwrap().unwrap();
    assert_eq!(active.id, "c1");
    assert_eq!(active.unread_count, 0);
    let ids: Vec<String> = reconciler.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(drain(&mut rx), vec![PushCommand::join("c1")]);
}

#[tokio::test]
async fn test_switching_leaves_previous_room() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([message_json("m1", "c1", "2024-05-01T09:00:00Z", "INBOUND", "a")]), 0).await;
    mount_detail(&server, "c2", json!([message_json("m5", "c2", "2024-05-01T11:00:00Z", "INBOUND", "b")]), 0).await;
    let (reconciler, mut rx) = reconciler(&server);

    reconciler.select_conversation("c1").await.unwrap();
    reconciler.select_conversation("c2").await.unwrap();
    let ids: Vec<String> = reconciler.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m5"]);
    assert_eq!(
        drain(&mut rx),
        vec![PushCommand::join("c1"), PushCommand::leave("c1"), PushCommand::join("c2")]
    );
}

#[tokio::test]
async fn test_double_select_keeps_pushed_messages() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(
        &server,
        "c1",
        json!([
            message_json("m1", "c1", "2024-05-01T08:00:00Z", "INBOUND", "one"),
            message_json("m2", "c1", "2024-05-01T08:01:00Z", "OUTBOUND", "two")
        ]),
        200,
    )
    .await;
    mount_messages(&server, "c1", json!([])).await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();

    let push = {
        let reconciler = reconciler.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reconciler
                .handle_push_event(PushEvent::MessageNew(pushed(
                    "m3",
                    "c1",
                    "2024-05-01T08:02:00Z",
                    "INBOUND",
                )))
                .await
                .unwrap();
        }
    };
    let (first, second, _) = tokio::join!(
        reconciler.select_conversation("c1"),
        reconciler.select_conversation("c1"),
        push
    );
    assert!(first.unwrap().is_none());
    assert!(second.unwrap().is_some());

    let ids: Vec<String> = reconciler.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(reconciler.active_conversation().unwrap().unread_count, 0);
}

#[tokio::test]
async fn test_stale_selection_discarded() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([message_json("slow", "c1", "2024-05-01T08:00:00Z", "INBOUND", "slow")]), 300).await;
    mount_detail(&server, "c2", json!([message_json("fast", "c2", "2024-05-01T11:00:00Z", "INBOUND", "fast")]), 0).await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();

    let slow = reconciler.select_conversation("c1");
    let fast = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        reconciler.select_conversation("c2").await
    };
    let (slow, fast) = tokio::join!(slow, fast);
    assert!(slow.unwrap().is_none());
    assert_eq!(fast.unwrap().unwrap().id, "c2");

    let ids: Vec<String> = reconciler.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["fast"]);
}

#[tokio::test]
async fn test_failed_select_clears_active_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Conversation not found"})))
        .mount(&server)
        .await;
    let (reconciler, mut rx) = reconciler(&server);

    let err = reconciler.select_conversation("missing").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(reconciler.active_conversation().is_none());
    assert!(reconciler.store().active_id().is_none());
    assert_eq!(
        drain(&mut rx),
        vec![PushCommand::join("missing"), PushCommand::leave("missing")]
    );
}

#[tokio::test]
async fn test_close_failure_leaves_state_untouched() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([]), 0).await;
    mount_messages(&server, "c1", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/conversations/c1/close"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut config = api_config(&server);
    config.timeout_ms = 200;
    let h = harness_with(config);
    h.session.persist_session(&tokens("token", "refresh", "15m")).unwrap();
    let reconciler = Reconciler::new(h.api.clone(), None, 50, 100);
    reconciler.load_conversations().await.unwrap();
    reconciler.select_conversation("c1").await.unwrap();

    let err = reconciler.close_conversation("c1", "tab-1").await.unwrap_err();
    assert!(matches!(err, operator_console::ConsoleError::Network(_)), "{err:?}");
    assert_eq!(
        err.user_message(),
        "Could not reach the server. Check your internet connection."
    );
    assert!(reconciler.store().contains("c1"));
    assert_eq!(reconciler.store().active_id(), Some("c1"));
}

#[tokio::test]
async fn test_close_success_removes_and_leaves() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([message_json("m1", "c1", "2024-05-01T09:00:00Z", "INBOUND", "a")]), 0).await;
    Mock::given(method("POST"))
        .and(path("/conversations/c1/close"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let (reconciler, mut rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();
    reconciler.select_conversation("c1").await.unwrap();

    reconciler.close_conversation("c1", "tab-1").await.unwrap();
    assert!(!reconciler.store().contains("c1"));
    assert!(reconciler.active_conversation().is_none());
    assert!(reconciler.messages().is_empty());
    assert_eq!(drain(&mut rx).last(), Some(&PushCommand::leave("c1")));
}

#[tokio::test]
async fn test_message_for_unknown_conversation_is_materialized() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations/c9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json("c9", "2024-05-01T07:00:00Z")))
        .expect(1)
        .mount(&server)
        .await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();

    reconciler
        .handle_push_event(PushEvent::MessageNew(pushed("m1", "c9", "2024-05-01T12:00:00Z", "INBOUND")))
        .await
        .unwrap();
    reconciler
        .handle_push_event(PushEvent::MessageNew(pushed("m1", "c9", "2024-05-01T12:00:00Z", "INBOUND")))
        .await
        .unwrap();

    let conversations = reconciler.conversations();
    assert_eq!(conversations[0].id, "c9");
    assert_eq!(conversations[0].contact_name.as_deref(), Some("Contact c9"));
    assert_eq!(conversations[0].unread_count, 1);
    assert_eq!(conversations[0].last_message_preview.as_deref(), Some("text m1"));
}

#[tokio::test]
async fn test_closed_event_clears_active() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([message_json("m1", "c1", "2024-05-01T09:00:00Z", "INBOUND", "a")]), 0).await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();
    reconciler.select_conversation("c1").await.unwrap();

    reconciler
        .handle_push_event(PushEvent::ConversationClosed(ClosedPayload::ById {
            conversation_id: "c1".to_string(),
        }))
        .await
        .unwrap();
    assert!(reconciler.active_conversation().is_none());
    assert!(reconciler.messages().is_empty());
    assert_eq!(reconciler.conversations().len(), 2);
}

#[tokio::test]
async fn test_push_loop_applies_events() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();

    let (tx, events) = tokio::sync::broadcast::channel(16);
    let pump = tokio::spawn(reconciler.clone().run_push_loop(events));
    tx.send(PushEvent::MessageNew(pushed("m1", "c1", "2024-05-01T13:00:00Z", "INBOUND"))).unwrap();
    let updated: operator_console::types::ConversationPayload =
        serde_json::from_value(json!({"id": "c3", "operatorName": "Carla"})).unwrap();
    tx.send(PushEvent::ConversationUpdated(updated)).unwrap();
    drop(tx);
    pump.await.unwrap();

    let store = reconciler.store();
    assert_eq!(store.conversations()[0].id, "c1");
    assert_eq!(store.conversation("c1").unwrap().unread_count, 1);
    assert_eq!(store.conversation("c3").unwrap().operator_name.as_deref(), Some("Carla"));
}

#[tokio::test]
async fn test_send_message_appends_to_active_timeline() {
    let server = MockServer::start().await;
    mount_list(&server).await;
    mount_detail(&server, "c1", json!([message_json("m1", "c1", "2024-05-01T09:00:00Z", "INBOUND", "a")]), 0).await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "m2",
            "conversationId": "c1",
            "content": "on my way",
            "fromMe": true,
            "createdAt": "2024-05-01T09:01:00Z"
        })))
        .mount(&server)
        .await;
    let (reconciler, _rx) = reconciler(&server);
    reconciler.load_conversations().await.unwrap();
    reconciler.select_conversation("c1").await.unwrap();

    let sent = reconciler.send_message("c1", "on my way").await.unwrap();
    assert_eq!(sent, normalize_message(pushed_outbound()));
    let timeline = reconciler.messages();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[1].content, "on my way");
    let active = reconciler.active_conversation().unwrap();
    assert_eq!(active.last_message_preview.as_deref(), Some("on my way"));
}

fn pushed_outbound() -> MessagePayload {
    serde_json::from_value(json!({
        "id": "m2",
        "conversationId": "c1",
        "content": "on my way",
        "fromMe": true,
        "createdAt": "2024-05-01T09:01:00Z"
    }))
    .unwrap()
}
