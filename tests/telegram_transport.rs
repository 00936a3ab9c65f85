//! Integration tests for the Bot API client, the forwarding engine and the bot
//! dispatcher against a mock Bot API.
//!
//! Each test spins up an Axum server on a random port that records every call
//! and answers from a per-method script.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use tag_relay::bot::{RelayBot, START_TEXT};
use tag_relay::capture::CaptureService;
use tag_relay::channels::{TelegramApi, Update};
use tag_relay::error::DeliveryError;
use tag_relay::forwarding::{Content, EngineConfig, ForwardingEngine, GroupMedia, Transport};
use tag_relay::store::{
    ContentKind, LibSqlBackend, MediaDescriptor, MessageStore, NewMessage, NewSubscription,
    OperatorRegistry, OperatorRole, SubscriptionRegistry, TagRegistry,
};
use tag_relay::tagging::{SessionStore, TaggingWorkflow};

const ADMIN: i64 = 7;
const TARGET: i64 = -2001;

#[derive(Clone, Default)]
struct MockApi {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    script: Arc<Mutex<HashMap<String, VecDeque<(StatusCode, String)>>>>,
    /// Calls addressed to this chat wait for the paired notify.
    held_chat: Arc<Mutex<Option<(i64, Arc<Notify>)>>>,
}

impl MockApi {
    async fn respond_next(&self, method: &str, status: StatusCode, body: &str) {
        self.script
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push_back((status, body.to_string()));
    }

    async fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }

    async fn hold_chat(&self, chat_id: i64) {
        *self.held_chat.lock().await = Some((chat_id, Arc::new(Notify::new())));
    }

    async fn release_chat(&self) {
        if let Some((_, release)) = self.held_chat.lock().await.take() {
            release.notify_one();
        }
    }

    async fn methods(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(|(m, _)| m.clone()).collect()
    }
}

fn default_result(method: &str, body: &Value) -> Value {
    let sent = json!({
        "message_id": 1,
        "chat": {"id": body["chat_id"], "type": "channel"},
        "date": 0
    });
    match method {
        "getUpdates" => json!([]),
        "answerCallbackQuery" => json!(true),
        "getChat" => json!({"id": body["chat_id"], "type": "channel", "title": "Mirror HQ"}),
        "getChatMemberCount" => json!(321),
        "sendMediaGroup" => json!([sent]),
        _ => sent,
    }
}

async fn handle(
    State(mock): State<MockApi>,
    Path((_token, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    mock.calls.lock().await.push((method.clone(), body.clone()));

    let held = mock.held_chat.lock().await.clone();
    if let Some((chat_id, release)) = held
        && body["chat_id"] == json!(chat_id)
    {
        release.notified().await;
    }

    let scripted = mock
        .script
        .lock()
        .await
        .get_mut(&method)
        .and_then(VecDeque::pop_front);
    match scripted {
        Some(reply) => reply,
        None => (
            StatusCode::OK,
            json!({"ok": true, "result": default_result(&method, &body)}).to_string(),
        ),
    }
}

/// Start the mock on a random port, return a client pointed at it.
async fn start_mock() -> (TelegramApi, MockApi) {
    let mock = MockApi::default();
    let app = Router::new()
        .route("/{token}/{method}", post(handle))
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let api = TelegramApi::new(
        SecretString::from("123:ABC".to_string()),
        &format!("http://127.0.0.1:{port}"),
    );
    (api, mock)
}

/// Wait for the spawned cycle to write its summary into the prompt.
async fn wait_for_edit(mock: &MockApi, needle: &str) -> String {
    for _ in 0..100 {
        let edits = mock.calls_to("editMessageText").await;
        if let Some(text) = edits
            .iter()
            .filter_map(|body| body["text"].as_str())
            .find(|text| text.contains(needle))
        {
            return text.to_string();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no prompt edit containing {needle:?}");
}

fn api_error(code: u16, description: &str, retry_after: Option<u64>) -> String {
    let mut body = json!({"ok": false, "error_code": code, "description": description});
    if let Some(secs) = retry_after {
        body["parameters"] = json!({"retry_after": secs});
    }
    body.to_string()
}

// ── Transport ───────────────────────────────────────────────────────

#[tokio::test]
async fn text_is_sent_with_send_message() {
    let (api, mock) = start_mock().await;
    api.deliver(
        TARGET,
        &Content::Text {
            text: "hello".into(),
        },
    )
    .await
    .unwrap();

    let calls = mock.calls_to("sendMessage").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["chat_id"], json!(TARGET));
    assert_eq!(calls[0]["text"], json!("hello"));
}

#[tokio::test]
async fn media_is_resent_by_file_id() {
    let (api, mock) = start_mock().await;
    api.deliver(
        TARGET,
        &Content::Media {
            kind: ContentKind::Video,
            file_id: "vid-1".into(),
            caption: Some("clip".into()),
        },
    )
    .await
    .unwrap();

    let calls = mock.calls_to("sendVideo").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["video"], json!("vid-1"));
    assert_eq!(calls[0]["caption"], json!("clip"));
}

#[tokio::test]
async fn oversized_caption_follows_the_media_as_text() {
    let (api, mock) = start_mock().await;
    let caption = "word ".repeat(300);
    api.deliver(
        TARGET,
        &Content::Media {
            kind: ContentKind::Photo,
            file_id: "ph-1".into(),
            caption: Some(caption.clone()),
        },
    )
    .await
    .unwrap();

    assert_eq!(mock.methods().await, vec!["sendPhoto", "sendMessage"]);
    let photo = &mock.calls_to("sendPhoto").await[0];
    assert!(photo.get("caption").is_none());
    let text = &mock.calls_to("sendMessage").await[0];
    assert_eq!(text["chat_id"], json!(TARGET));
    assert_eq!(text["text"], json!(caption));
}

#[tokio::test]
async fn album_caption_rides_on_first_item() {
    let (api, mock) = start_mock().await;
    api.deliver(
        TARGET,
        &Content::Group {
            items: vec![
                GroupMedia {
                    kind: ContentKind::Photo,
                    file_id: "a".into(),
                },
                GroupMedia {
                    kind: ContentKind::Video,
                    file_id: "b".into(),
                },
            ],
            caption: Some("album".into()),
        },
    )
    .await
    .unwrap();

    let calls = mock.calls_to("sendMediaGroup").await;
    assert_eq!(calls.len(), 1);
    let media = calls[0]["media"].as_array().unwrap();
    assert_eq!(media.len(), 2);
    assert_eq!(media[0]["type"], json!("photo"));
    assert_eq!(media[0]["media"], json!("a"));
    assert_eq!(media[0]["caption"], json!("album"));
    assert_eq!(media[1]["type"], json!("video"));
    assert!(media[1].get("caption").is_none());
}

#[tokio::test]
async fn missing_source_is_permanent() {
    let (api, mock) = start_mock().await;
    mock.respond_next(
        "sendPhoto",
        StatusCode::BAD_REQUEST,
        &api_error(400, "Bad Request: wrong file identifier/HTTP URL specified", None),
    )
    .await;

    let err = api
        .deliver(
            TARGET,
            &Content::Media {
                kind: ContentKind::Photo,
                file_id: "gone".into(),
                caption: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_permanent());
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let (api, mock) = start_mock().await;
    mock.respond_next(
        "sendMessage",
        StatusCode::TOO_MANY_REQUESTS,
        &api_error(429, "Too Many Requests: retry after 3", Some(3)),
    )
    .await;

    let err = api
        .deliver(TARGET, &Content::Text { text: "x".into() })
        .await
        .unwrap_err();
    match err {
        DeliveryError::Transient { reason } => assert!(reason.contains("retry after 3s")),
        other => panic!("expected transient, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_page_is_transient() {
    let (api, mock) = start_mock().await;
    mock.respond_next("sendMessage", StatusCode::BAD_GATEWAY, "<html>bad gateway</html>")
        .await;

    let err = api
        .deliver(TARGET, &Content::Text { text: "x".into() })
        .await
        .unwrap_err();
    assert!(!err.is_permanent());
}

#[tokio::test]
async fn channel_info_reads_title_and_member_count() {
    let (api, mock) = start_mock().await;
    let info = api.channel_info(TARGET).await.unwrap();
    assert_eq!(info.title, "Mirror HQ");
    assert_eq!(info.member_count, 321);
    assert_eq!(mock.methods().await, vec!["getChat", "getChatMemberCount"]);
}

// ── Engine over the Bot API ─────────────────────────────────────────

#[tokio::test]
async fn engine_skips_unresolvable_and_refreshes_metadata() {
    let (api, mock) = start_mock().await;
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.add_subscription(&NewSubscription::new(TARGET, "mirror", "news").with_batch_size(5))
        .await
        .unwrap();

    let base = NewMessage {
        chat_id: ADMIN,
        message_id: 1,
        sender_id: ADMIN,
        sender_name: "alice".into(),
        origin_chat_id: -1001,
        origin_message_id: 1,
        kind: ContentKind::Text,
        caption: Some("first".into()),
        group_id: None,
        media: MediaDescriptor::default(),
        tag: Some("news".into()),
    };
    db.capture_message(&base).await.unwrap();
    let last = db
        .capture_message(&NewMessage {
            kind: ContentKind::Photo,
            caption: None,
            media: MediaDescriptor {
                file_id: Some("deleted".into()),
                ..Default::default()
            },
            ..base.clone()
        })
        .await
        .unwrap();
    mock.respond_next(
        "sendPhoto",
        StatusCode::BAD_REQUEST,
        &api_error(400, "Bad Request: wrong file identifier/HTTP URL specified", None),
    )
    .await;

    let engine = ForwardingEngine::new(
        db.clone(),
        db.clone(),
        Arc::new(api),
        EngineConfig::default(),
    );
    let report = engine.run_cycle(TARGET).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 1);
    let sub = db.get_subscription(TARGET).await.unwrap().unwrap();
    assert_eq!(sub.cursor, last);
    assert_eq!(sub.name, "Mirror HQ");
    assert_eq!(sub.member_count, Some(321));
}

// ── Bot dispatch ────────────────────────────────────────────────────

async fn start_bot() -> (RelayBot, MockApi, Arc<LibSqlBackend>) {
    let (api, mock) = start_mock().await;
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.upsert_operator(ADMIN, "Alice", None, OperatorRole::Admin)
        .await
        .unwrap();

    let workflow = Arc::new(TaggingWorkflow::new(
        db.clone(),
        SessionStore::new(Duration::from_secs(60)),
    ));
    let engine = Arc::new(ForwardingEngine::new(
        db.clone(),
        db.clone(),
        Arc::new(api.clone()),
        EngineConfig::default(),
    ));
    let capture = CaptureService::new(db.clone(), db.clone(), workflow.clone());
    let bot = RelayBot::new(api, db.clone(), capture, workflow, engine);
    (bot, mock, db)
}

fn text_update(user_id: i64, text: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 10,
            "from": {"id": user_id, "first_name": "Alice"},
            "chat": {"id": user_id, "type": "private"},
            "date": 0,
            "text": text
        }
    }))
    .unwrap()
}

fn forward_update(user_id: i64) -> Update {
    serde_json::from_value(json!({
        "update_id": 2,
        "message": {
            "message_id": 11,
            "from": {"id": user_id, "first_name": "Alice"},
            "chat": {"id": user_id, "type": "private"},
            "date": 0,
            "text": "breaking news",
            "forward_origin": {
                "type": "channel",
                "chat": {"id": -1001, "type": "channel", "title": "Daily News", "username": "dailynews"},
                "message_id": 300,
                "date": 0
            }
        }
    }))
    .unwrap()
}

fn callback_update(user_id: i64, data: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 3,
        "callback_query": {
            "id": "cb-1",
            "from": {"id": user_id, "first_name": "Alice"},
            "message": {"message_id": 12, "chat": {"id": user_id, "type": "private"}, "date": 0},
            "chat_instance": "x",
            "data": data
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn non_admin_gets_no_response() {
    let (bot, mock, _db) = start_bot().await;
    bot.handle_update(text_update(99, "/start")).await;
    bot.handle_update(forward_update(99)).await;
    assert!(mock.methods().await.is_empty());
}

#[tokio::test]
async fn admin_start_lists_commands() {
    let (bot, mock, _db) = start_bot().await;
    bot.handle_update(text_update(ADMIN, "/start")).await;

    let calls = mock.calls_to("sendMessage").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["text"], json!(START_TEXT));
}

#[tokio::test]
async fn forward_from_new_channel_through_tagging_to_storage() {
    let (bot, mock, db) = start_bot().await;

    bot.handle_update(forward_update(ADMIN)).await;
    let prompts = mock.calls_to("sendMessage").await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(
        prompts[0]["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
        json!("create_tag:-1001")
    );
    assert!(db.messages_for_tag("sports", 0, 10).await.unwrap().is_empty());

    bot.handle_update(callback_update(ADMIN, "new_tag:-1001")).await;
    bot.handle_update(text_update(ADMIN, "sports")).await;
    assert_eq!(db.active_binding(-1001).await.unwrap().unwrap().tag, "sports");

    bot.handle_update(forward_update(ADMIN)).await;
    let stored = db.messages_for_tag("sports", 0, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].caption.as_deref(), Some("breaking news"));

    assert!(mock.calls_to("answerCallbackQuery").await.len() == 1);
    assert!(!mock.calls_to("editMessageText").await.is_empty());
}

#[tokio::test]
async fn stale_decision_is_reported() {
    let (bot, mock, _db) = start_bot().await;
    bot.handle_update(callback_update(ADMIN, "set_tag:-1001:news")).await;

    let edits = mock.calls_to("editMessageText").await;
    assert_eq!(edits.len(), 1);
    assert!(edits[0]["text"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn forward_button_runs_a_cycle() {
    let (bot, mock, db) = start_bot().await;
    db.add_subscription(&NewSubscription::new(TARGET, "mirror", "news"))
        .await
        .unwrap();
    db.bind(-1001, "Daily News", "dailynews", "news").await.unwrap();
    bot.handle_update(forward_update(ADMIN)).await;

    bot.handle_update(text_update(ADMIN, "/forward")).await;
    let listing = mock.calls_to("sendMessage").await;
    assert_eq!(
        listing[0]["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
        json!(format!("forward_channel:{TARGET}"))
    );

    bot.handle_update(callback_update(ADMIN, &format!("forward_channel:{TARGET}")))
        .await;
    let last = wait_for_edit(&mock, "Forwarded").await;
    assert!(last.contains("Forwarded 1 message(s)"), "{last}");

    let relayed: Vec<_> = mock
        .calls_to("sendMessage")
        .await
        .into_iter()
        .filter(|body| body["chat_id"] == json!(TARGET))
        .collect();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0]["text"], json!("breaking news"));
    assert!(db.get_subscription(TARGET).await.unwrap().unwrap().cursor > 0);
}

#[tokio::test]
async fn manual_forward_does_not_block_other_updates() {
    let (bot, mock, db) = start_bot().await;
    db.add_subscription(&NewSubscription::new(TARGET, "mirror", "news"))
        .await
        .unwrap();
    db.bind(-1001, "Daily News", "dailynews", "news").await.unwrap();
    bot.handle_update(forward_update(ADMIN)).await;
    mock.hold_chat(TARGET).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        bot.handle_update(callback_update(ADMIN, &format!("forward_channel:{TARGET}"))),
    )
    .await
    .expect("callback handling waited for the cycle");

    // Delivery is parked, yet commands are still answered.
    bot.handle_update(text_update(ADMIN, "/start")).await;
    let replies = mock.calls_to("sendMessage").await;
    assert!(replies.iter().any(|body| body["text"] == json!(START_TEXT)));
    assert_eq!(db.get_subscription(TARGET).await.unwrap().unwrap().cursor, 0);

    mock.release_chat().await;
    let last = wait_for_edit(&mock, "Forwarded").await;
    assert!(last.contains("Forwarded 1 message(s)"), "{last}");
    assert!(db.get_subscription(TARGET).await.unwrap().unwrap().cursor > 0);
}
