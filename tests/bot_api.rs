// tests/bot_api.rs
//
// BotApiClient against an in-process mock of the Bot API, one token per
// behaviour.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::Query,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;

use telegram_monitor::monitor::{BotApiClient, FetchError, UpdateFetcher};

async fn mock_bot_api(uri: Uri, Query(q): Query<HashMap<String, String>>) -> Response {
    let offset: i64 = q.get("offset").and_then(|o| o.parse().ok()).unwrap_or(-1);
    match uri.path() {
        "/botgood/getUpdates" => Json(json!({
            "ok": true,
            "result": [
                {"update_id": offset, "message": {"message_id": 1, "chat": {"id": -100}, "text": "hi"}},
                {"update_id": offset + 1, "edited_message": {"chat": {"id": -100}}}
            ]
        }))
        .into_response(),
        "/botrevoked/getUpdates" => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error_code": 401, "description": "Unauthorized"})),
        )
            .into_response(),
        "/botbusy/getUpdates" => StatusCode::BAD_GATEWAY.into_response(),
        "/botapi/getUpdates" => Json(json!({
            "ok": false,
            "description": "Conflict: terminated by other getUpdates request"
        }))
        .into_response(),
        "/botjunk/getUpdates" => "<html>not json</html>".into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve() -> SocketAddr {
    let app = Router::new().fallback(mock_bot_api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn client() -> BotApiClient {
    let addr = serve().await;
    BotApiClient::new(&format!("http://{addr}/"), Duration::from_secs(2)).unwrap()
}

const POLL: Duration = Duration::from_secs(0);

#[tokio::test]
async fn ok_response_yields_updates_and_forwards_offset() {
    let c = client().await;
    let updates = c.get_updates("good", 42, POLL).await.expect("updates");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].update_id, 42);
    assert_eq!(updates[0].chat_id().as_deref(), Some("-100"));
    assert_eq!(updates[1].update_id, 43);
    assert!(updates[1].message.is_none());
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let c = client().await;
    assert_eq!(
        c.get_updates("revoked", 1, POLL).await.unwrap_err(),
        FetchError::Unauthorized
    );
    assert_eq!(
        c.get_updates("busy", 1, POLL).await.unwrap_err(),
        FetchError::Http { status: 502 }
    );
    assert_eq!(
        c.get_updates("missing", 1, POLL).await.unwrap_err(),
        FetchError::Http { status: 404 }
    );
}

#[tokio::test]
async fn api_level_failure_carries_description() {
    let c = client().await;
    let err = c.get_updates("api", 1, POLL).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "API Error: Conflict: terminated by other getUpdates request"
    );
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn undecodable_body_is_unexpected() {
    let c = client().await;
    let err = c.get_updates("junk", 1, POLL).await.unwrap_err();
    assert!(matches!(err, FetchError::Unexpected(_)), "{err:?}");
}

#[tokio::test]
async fn network_failure_never_leaks_the_token() {
    // nothing listens on the discard port
    let c = BotApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let err = c
        .get_updates("123456:SECRET", 1, POLL)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    assert!(!err.to_string().contains("SECRET"), "{err}");
}
