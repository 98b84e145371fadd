use actix_web::{http::StatusCode, test, web, App};
use batch_chat_service::{
    config::Config,
    routes,
    state::AppState,
    storage::{BatchRepository, InMemoryBatchRepository},
};
use serde_json::{json, Value};
use std::sync::Arc;

fn test_state() -> AppState {
    let repo: Arc<dyn BatchRepository> = Arc::new(InMemoryBatchRepository::new());
    AppState::new(&Config::test_defaults(), repo, None)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(routes::configure_routes),
        )
        .await
    };
}

macro_rules! post_json {
    ($app:expr, $uri:expr, $body:expr) => {{
        let req = test::TestRequest::post().uri($uri).set_json($body).to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

macro_rules! get_json {
    ($app:expr, $uri:expr) => {{
        let req = test::TestRequest::get().uri($uri).to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

#[actix_web::test]
async fn health_returns_ok() {
    let state = test_state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"OK"));
}

#[actix_web::test]
async fn send_message_returns_created_payload() {
    let state = test_state();
    let app = app!(state);

    let (status, body) = post_json!(
        app,
        "/chat/messages/send",
        json!({"senderId": "u1", "receiverId": "u2", "message": "hello"})
    );

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Message sent successfully");
    assert_eq!(body["data"]["senderId"], "u1");
    assert_eq!(body["data"]["message"], "hello");
    assert!(body["data"]["timestamp"].is_string());
}

#[actix_web::test]
async fn send_message_missing_field_is_bad_request() {
    let state = test_state();
    let app = app!(state);

    for body in [
        json!({"receiverId": "u2", "message": "hi"}),
        json!({"senderId": "u1", "message": "hi"}),
        json!({"senderId": "u1", "receiverId": "u2"}),
        json!({"senderId": "u1", "receiverId": "u2", "message": ""}),
    ] {
        let (status, resp) = post_json!(app, "/chat/messages/send", body);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["message"].as_str().unwrap().ends_with("is required"));
    }

    let (_, messages) = get_json!(app, "/chat/messages/u1/u2");
    assert_eq!(messages, json!([]));
}

#[actix_web::test]
async fn malformed_json_is_bad_request() {
    let state = test_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/chat/messages/send")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn initiate_chat_created_then_exists() {
    let state = test_state();
    let app = app!(state);

    let (status, body) = post_json!(
        app,
        "/chat/chats/initiate",
        json!({"userId1": "u2", "userId2": "u1"})
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"message": "Chat created successfully", "chatId": "u1_u2"}));

    let (status, body) = post_json!(
        app,
        "/chat/chats/initiate",
        json!({"userId1": "u1", "userId2": "u2"})
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Chat already exists", "chatId": "u1_u2"}));

    let (status, _) = post_json!(app, "/chat/chats/initiate", json!({"userId1": "u1"}));
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn conversation_scenario_over_http() {
    let state = test_state();
    let app = app!(state);

    for (from, to, text) in [("u1", "u2", "hi"), ("u2", "u1", "hey"), ("u1", "u2", "how are you")] {
        let (status, _) = post_json!(
            app,
            "/chat/messages/send",
            json!({"senderId": from, "receiverId": to, "message": text})
        );
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, messages) = get_json!(app, "/chat/messages/u2/u1");
    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["hi", "hey", "how are you"]);

    let (_, unread) = get_json!(app, "/chat/unread-count/u2");
    assert_eq!(unread, json!({"u1_u2": 2}));

    let (status, body) = post_json!(
        app,
        "/chat/messages/mark-read",
        json!({"userId": "u2", "chatId": "u1_u2"})
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Messages marked as read"}));

    let (_, unread) = get_json!(app, "/chat/unread-count/u2");
    assert_eq!(unread, json!({}));
    let (_, unread) = get_json!(app, "/chat/unread-count/u1");
    assert_eq!(unread, json!({"u1_u2": 1}));
}

#[actix_web::test]
async fn mark_read_requires_both_fields() {
    let state = test_state();
    let app = app!(state);

    let (status, _) = post_json!(app, "/chat/messages/mark-read", json!({"userId": "u2"}));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = post_json!(app, "/chat/messages/mark-read", json!({"chatId": "u1_u2"}));
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn search_enforces_minimum_length() {
    let state = test_state();
    let app = app!(state);

    post_json!(
        app,
        "/chat/messages/send",
        json!({"senderId": "u1", "receiverId": "u2", "message": "Lunch at noon?"})
    );
    post_json!(
        app,
        "/chat/messages/send",
        json!({"senderId": "u2", "receiverId": "u1", "message": "lunch sounds good"})
    );

    let (status, body) = get_json!(app, "/chat/search/u1/lu");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, hits) = get_json!(app, "/chat/search/u1/LUNCH");
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["message"], "lunch sounds good");
    assert_eq!(hits[0]["chatId"], "u1_u2");
    assert_eq!(hits[1]["senderId"], "u1");
}

#[actix_web::test]
async fn chat_listings_group_messages() {
    let state = test_state();
    let app = app!(state);

    for (from, to) in [("a", "b"), ("a", "c"), ("b", "a")] {
        post_json!(
            app,
            "/chat/messages/send",
            json!({"senderId": from, "receiverId": to, "message": format!("{from} to {to}")})
        );
    }

    let (status, chats) = get_json!(app, "/chat/chats/a");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.as_array().unwrap().len(), 2);

    let (_, chats) = get_json!(app, "/chat/chats/b");
    let chats = chats.as_array().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["chatId"], "a_b");
    assert_eq!(chats[0]["messages"].as_array().unwrap().len(), 2);

    let (status, all) = get_json!(app, "/chat/chats");
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["chatId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a_b", "a_c"]);

    let (_, page) = get_json!(app, "/chat/chats?limit=1&offset=1");
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["chatId"], "a_c");

    let (status, _) = get_json!(app, "/chat/chats?limit=abc");
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn http_send_reaches_subscribed_connections() {
    let state = test_state();
    let app = app!(state);

    let chat_id = batch_chat_service::models::ChatId::resolve("u1", "u2").unwrap();
    let (subscriber, mut rx) = state.registry.connect().await;
    state.registry.subscribe(subscriber, &chat_id).await;

    post_json!(
        app,
        "/chat/messages/send",
        json!({"senderId": "u1", "receiverId": "u2", "message": "ping"})
    );

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["event"], "receiveMessage");
    assert_eq!(frame["data"]["message"], "ping");
}
