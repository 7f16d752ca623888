use super::*;
use crate::sessions::tests::MockFactory;
use axum::body::Body;
use axum::http::{header, Method, Request};
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use wagate_core::config::Config;

struct TestApp {
    router: Router,
    store: Store,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    uploads: tempfile::TempDir,
}

async fn test_app_with(api_key: &str, factory: MockFactory) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.api.api_key = api_key.to_string();
    config.bulk.delay_ms = 0;
    config.uploads.dir = uploads.path().display().to_string();
    config.uploads.max_file_mb = 1;
    config.whatsapp.pair_timeout_secs = 1;

    let sent = factory.sent.clone();
    let store = Store::in_memory().await.unwrap();
    let sessions = SessionManager::new(store.clone(), Arc::new(factory));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        sessions.clone(),
        config.bulk.clone(),
    ));
    let state = ApiState::new(&config, store.clone(), sessions, dispatcher);

    TestApp {
        router: build_router(state, 4 * 1024 * 1024),
        store,
        sent,
        uploads,
    }
}

async fn test_app() -> TestApp {
    test_app_with("", MockFactory::default()).await
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

async fn call(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

/// Create an account through the API and return its id.
async fn create_account(app: &TestApp, name: &str) -> String {
    let (status, json) = call(
        app,
        json_request(Method::POST, "/api/accounts", json!({"name": name})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

async fn connected_account(app: &TestApp) -> String {
    let id = create_account(app, "Main").await;
    let (status, json) = call(
        app,
        empty_request(Method::POST, &format!("/api/accounts/{id}/connect")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "connected");
    id
}

const BOUNDARY: &str = "wagate-test-boundary";

fn multipart_request(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/messages/send-media")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Health and auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_no_auth() {
    let app = test_app().await;
    let (status, json) = call(&app, empty_request(Method::GET, "/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["accounts"], 0);
    assert_eq!(json["connected"], 0);
}

#[tokio::test]
async fn test_health_valid_auth() {
    let app = test_app_with("secret", MockFactory::default()).await;
    let req = Request::get("/api/health")
        .header("Authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bad_and_missing_auth() {
    let app = test_app_with("secret", MockFactory::default()).await;

    let req = Request::get("/api/health")
        .header("Authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, json) = call(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "invalid token");

    let (status, _) = call(&app, empty_request(Method::GET, "/api/contacts")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[test]
fn test_constant_time_eq() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_account_crud() {
    let app = test_app().await;

    let (status, _) = call(
        &app,
        json_request(Method::POST, "/api/accounts", json!({"name": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = call(
        &app,
        json_request(
            Method::POST,
            "/api/accounts",
            json!({"name": "Sales", "phone": "+55 11 99988-7766"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["phone"], "5511999887766");
    assert_eq!(created["status"], "disconnected");
    assert_eq!(created["connected"], false);
    let id = created["id"].as_str().unwrap();

    let (status, updated) = call(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/accounts/{id}"),
            json!({"name": "Sales BR"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Sales BR");
    assert_eq!(updated["phone"], "5511999887766");

    let (status, list) = call(&app, empty_request(Method::GET, "/api/accounts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["accounts"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        empty_request(Method::DELETE, &format!("/api/accounts/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = call(
        &app,
        empty_request(Method::GET, &format!("/api/accounts/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_connect_unknown_account() {
    let app = test_app().await;
    let (status, _) = call(
        &app,
        empty_request(Method::POST, "/api/accounts/missing/connect"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_disconnect_lifecycle() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let (_, json) = call(
        &app,
        empty_request(Method::GET, &format!("/api/accounts/{id}/status")),
    )
    .await;
    assert_eq!(json["connected"], true);

    let (status, json) = call(
        &app,
        empty_request(Method::POST, &format!("/api/accounts/{id}/disconnect")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "disconnected");

    let (_, json) = call(&app, empty_request(Method::GET, "/api/health")).await;
    assert_eq!(json["connected"], 0);

    let (status, json) = call(
        &app,
        empty_request(Method::POST, &format!("/api/accounts/{id}/reconnect")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "connected");
}

#[tokio::test]
async fn test_connect_returns_qr_for_unpaired_account() {
    let factory = MockFactory {
        pair_with_qr: true,
        ..Default::default()
    };
    let app = test_app_with("", factory).await;
    let id = create_account(&app, "New").await;

    // No session yet, so no QR.
    let (status, _) = call(
        &app,
        empty_request(Method::GET, &format!("/api/accounts/{id}/qr")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = call(
        &app,
        empty_request(Method::POST, &format!("/api/accounts/{id}/connect")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "qr_pending");
    assert_eq!(json["qr"], "2@mock-qr");
    assert!(!json["qr_png_base64"].as_str().unwrap().is_empty());

    let (status, json) = call(
        &app,
        empty_request(Method::GET, &format!("/api/accounts/{id}/qr")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["qr"], "2@mock-qr");

    let resp = app
        .router
        .clone()
        .oneshot(empty_request(
            Method::GET,
            &format!("/api/accounts/{id}/qr?format=png"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    let png = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&png[..4], &[0x89, 0x50, 0x4E, 0x47]);

    // Pairing never completes with this mock; the long-poll gives up.
    let (status, json) = call(
        &app,
        empty_request(Method::GET, &format!("/api/accounts/{id}/status")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connected"], false);
    assert_eq!(json["status"], "qr_pending");
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_send_text_and_log() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let (status, json) = call(
        &app,
        json_request(
            Method::POST,
            "/api/messages/send",
            json!({"account_id": id, "to": "+55 11 99988-7766", "message": "hello"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "sent");
    assert_eq!(json["recipient"], "5511999887766");
    assert_eq!(app.sent.lock().unwrap().len(), 1);

    let (status, json) = call(
        &app,
        empty_request(Method::GET, &format!("/api/messages?account_id={id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["status"], "sent");
    assert_eq!(messages[0]["body"], "hello");
}

#[tokio::test]
async fn test_send_validation() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let cases = [
        json!({"account_id": id, "to": "5511999887766"}),
        json!({"account_id": id, "to": "5511999887766", "message": "a", "template_id": "t"}),
        json!({"account_id": id, "to": "5511999887766", "message": "  "}),
        json!({"account_id": id, "to": "abc", "message": "hi"}),
        json!({"account_id": "", "to": "5511999887766", "message": "hi"}),
    ];
    for body in cases {
        let (status, json) =
            call(&app, json_request(Method::POST, "/api/messages/send", body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(json["error"].is_string());
    }

    let req = Request::post("/api/messages/send")
        .header("Content-Type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_on_disconnected_account_conflicts() {
    let app = test_app().await;
    let id = create_account(&app, "Offline").await;
    let (status, json) = call(
        &app,
        json_request(
            Method::POST,
            "/api/messages/send",
            json!({"account_id": id, "to": "5511999887766", "message": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("not connected"));
}

#[tokio::test]
async fn test_failed_send_is_bad_gateway_and_logged() {
    let factory = MockFactory {
        fail_to: Some("5511999887766@s.whatsapp.net".into()),
        ..Default::default()
    };
    let app = test_app_with("", factory).await;
    let id = connected_account(&app).await;

    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/messages/send",
            json!({"account_id": id, "to": "5511999887766", "message": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let log = app.store.list_messages(Some(&id), None, None).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, wagate_core::types::MessageStatus::Failed);
}

#[tokio::test]
async fn test_bulk_with_template_and_contacts() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let (_, contact) = call(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            json!({"name": "Ana", "phone": "5511000000001"}),
        ),
    )
    .await;
    let (_, tpl) = call(
        &app,
        json_request(
            Method::POST,
            "/api/templates",
            json!({"name": "promo", "body": "Hi {{name}}, use {{code}}"}),
        ),
    )
    .await;

    let (status, report) = call(
        &app,
        json_request(
            Method::POST,
            "/api/messages/bulk",
            json!({
                "account_id": id,
                "recipients": ["5511000000002", "5511000000001"],
                "contact_ids": [contact["id"]],
                "template_id": tpl["id"],
                "variables": {"code": "SAVE10", "name": "there"},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total"], 2);
    assert_eq!(report["sent"], 2);
    assert_eq!(report["failed"], 0);

    let bodies: Vec<String> = app
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|(_, b)| b.clone())
        .collect();
    assert_eq!(bodies, vec!["Hi there, use SAVE10", "Hi Ana, use SAVE10"]);
}

#[tokio::test]
async fn test_bulk_rejects_empty_recipients() {
    let app = test_app().await;
    let id = connected_account(&app).await;
    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/messages/bulk",
            json!({"account_id": id, "message": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_media_upload() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let req = multipart_request(
        &[("account_id", id.as_str()), ("to", "5511999887766"), ("caption", "look")],
        Some(("photo.bin", "application/octet-stream", &png[..])),
    );
    let (status, json) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["kind"], "image");
    assert_eq!(json["mime_type"], "image/png");

    let sent = app.sent.lock().unwrap().clone();
    assert_eq!(sent[0].1, "[image] photo.bin");

    // The temp file is gone once the request finishes.
    let leftovers = std::fs::read_dir(app.uploads.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_send_media_validation() {
    let app = test_app().await;
    let id = connected_account(&app).await;

    let (status, json) = call(
        &app,
        multipart_request(&[("account_id", id.as_str()), ("to", "5511999887766")], None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "file is required");

    let (status, _) = call(
        &app,
        multipart_request(
            &[("account_id", id.as_str()), ("to", "5511999887766"), ("extra", "x")],
            Some(("a.txt", "text/plain", &b"hi"[..])),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let big = vec![0u8; 1024 * 1024 + 1];
    let (status, _) = call(
        &app,
        multipart_request(
            &[("account_id", id.as_str()), ("to", "5511999887766")],
            Some(("big.bin", "application/pdf", &big[..])),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(std::fs::read_dir(app.uploads.path()).unwrap().count(), 0);
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_template_crud_and_preview() {
    let app = test_app().await;

    let (status, created) = call(
        &app,
        json_request(
            Method::POST,
            "/api/templates",
            json!({"name": "welcome", "body": "Hello {{name}}, order {{order}}"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["placeholders"], json!(["name", "order"]));
    let id = created["id"].as_str().unwrap();

    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/templates",
            json!({"name": "welcome", "body": "dup"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, preview) = call(
        &app,
        json_request(
            Method::POST,
            &format!("/api/templates/{id}/preview"),
            json!({"variables": {"name": "Ana"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["rendered"], "Hello Ana, order {{order}}");
    assert_eq!(preview["missing"], json!(["order"]));

    let (status, _) = call(
        &app,
        json_request(Method::PUT, &format!("/api/templates/{id}"), json!({"body": " "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = call(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/templates/{id}"),
            json!({"body": "Bye {{name}}"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "welcome");
    assert_eq!(updated["placeholders"], json!(["name"]));

    let (status, _) = call(
        &app,
        empty_request(Method::DELETE, &format!("/api/templates/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &app,
        empty_request(Method::GET, &format!("/api/templates/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_contact_crud_and_search() {
    let app = test_app().await;

    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            json!({"name": "Bad", "phone": "12"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ana) = call(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            json!({"name": "Ana Lima", "phone": "+55 (11) 90000-0001", "email": "ana@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ana["phone"], "5511900000001");

    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            json!({"name": "Ana Again", "phone": "5511900000001"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    call(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            json!({"name": "Bruno", "phone": "5511900000002"}),
        ),
    )
    .await;

    let (_, found) = call(&app, empty_request(Method::GET, "/api/contacts?search=ana")).await;
    let found = found["contacts"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "Ana Lima");

    let id = ana["id"].as_str().unwrap();
    let (status, updated) = call(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/contacts/{id}"),
            json!({"notes": "VIP"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["notes"], "VIP");
    assert_eq!(updated["email"], "ana@example.com");

    let (status, _) = call(
        &app,
        empty_request(Method::DELETE, &format!("/api/contacts/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &app,
        empty_request(Method::DELETE, &format!("/api/contacts/{id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
