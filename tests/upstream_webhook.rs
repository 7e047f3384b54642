mod common;

use common::{MockOpenApi, build_server, test_config, wait_until};
use reqwest::StatusCode;
use satori_qq::adapter::webhook::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER, sign, signing_key};
use satori_qq::server::Server;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const SECRET: &str = "s";

async fn spawn_webhook() -> (Arc<Server>, SocketAddr, TempDir) {
    let mut config = test_config();
    config.account.app_secret = SECRET.into();
    let (server, dir) = build_server(config, MockOpenApi::new()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = webhook::router(server.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (server, addr, dir)
}

async fn post_signed(addr: SocketAddr, body: &str) -> reqwest::Response {
    let timestamp = "1725442341";
    let signature = sign(&signing_key(SECRET), timestamp, body.as_bytes());
    reqwest::Client::new()
        .post(format!("http://{}/qqbot", addr))
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(TIMESTAMP_HEADER, timestamp)
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn validation_returns_signed_token() {
    let (_server, addr, _dir) = spawn_webhook().await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/qqbot", addr))
        .header("Content-Type", "application/json")
        .body(r#"{"op":13,"d":{"plain_token":"pt","event_ts":"123"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["plain_token"], "pt");
    let signature = body["signature"].as_str().unwrap();
    assert_eq!(signature.len(), 128);
    assert!(webhook::verify(&signing_key(SECRET), signature, "123", b"pt"));
}

fn group_message(id: &str, content: &str) -> String {
    json!({
        "op": 0,
        "t": "GROUP_AT_MESSAGE_CREATE",
        "d": {
            "id": id,
            "content": content,
            "timestamp": "2024-01-01T00:00:00+08:00",
            "group_openid": "G1",
            "author": {"id": "A", "member_openid": "M1"}
        }
    })
    .to_string()
}

#[tokio::test]
async fn events_keep_arrival_order_and_duplicates_are_dropped() {
    let (server, addr, _dir) = spawn_webhook().await;
    let first = group_message("m1", "first");

    let response = post_signed(addr, &first).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"success": true}));
    post_signed(addr, &group_message("m2", "second")).await;
    let duplicate = post_signed(addr, &first).await;
    assert_eq!(duplicate.status(), StatusCode::OK);
    post_signed(addr, &group_message("m3", "third")).await;

    let hub = server.hub.clone();
    assert!(wait_until(|| hub.last_sn() == 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.last_sn(), 3);

    let events = hub.replay_after(0);
    let contents: Vec<&str> = events
        .iter()
        .map(|e| e.message.as_ref().unwrap().content.as_str())
        .collect();
    assert_eq!(contents, ["first", "second", "third"]);
    assert!(events.windows(2).all(|w| w[0].sn < w[1].sn));
    assert!(events.iter().all(|e| e.event_type == "message-created"));
    assert!(events.iter().all(|e| e.platform() == Some("qq")));
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let (server, addr, _dir) = spawn_webhook().await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/qqbot", addr))
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, "00".repeat(64))
        .header(TIMESTAMP_HEADER, "1")
        .body(r#"{"op":0,"t":"GUILD_CREATE","d":{}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let unsigned = reqwest::Client::new()
        .post(format!("http://{}/qqbot", addr))
        .header("Content-Type", "application/json")
        .body(r#"{"op":0,"t":"GUILD_CREATE","d":{}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.hub.last_sn(), 0);
}
