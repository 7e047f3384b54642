mod common;

use common::{MockOpenApi, build_server, test_config, wait_until};
use futures_util::{SinkExt, StreamExt};
use satori_qq::adapter::gateway;
use satori_qq::satori::LoginStatus;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// 只接受一个连接的假网关；返回收到的第一帧
async fn fake_gateway(listener: TcpListener, frames: Vec<Value>, first: oneshot::Sender<Value>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    socket
        .send(WsMessage::Text(
            json!({"op": 10, "d": {"heartbeat_interval": 45000}}).to_string().into(),
        ))
        .await
        .unwrap();

    let greeting = loop {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    let _ = first.send(greeting);

    for frame in frames {
        socket
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .unwrap();
    }
    // 保持连接直到对端断开
    while let Some(Ok(_)) = socket.next().await {}
}

#[tokio::test]
async fn identify_then_dispatch_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let api = MockOpenApi::new();
    api.respond("/gateway", json!({"url": format!("ws://{}", addr)}));
    let (server, _dir) = build_server(test_config(), api).await;

    let message = |id: &str, content: &str, s: i64| {
        json!({
            "op": 0, "s": s, "t": "GROUP_AT_MESSAGE_CREATE", "id": format!("evt-{}", id),
            "d": {
                "id": id,
                "content": content,
                "timestamp": "2024-01-01T00:00:00+08:00",
                "group_openid": "G1",
                "author": {"id": "A", "member_openid": "M1"}
            }
        })
    };
    let frames = vec![
        json!({"op": 0, "s": 1, "t": "READY", "d": {
            "session_id": "sess-1",
            "user": {"id": "B1", "username": "bot"}
        }}),
        message("m1", "first", 2),
        message("m2", "second", 3),
        // 重复投递的同一事件
        message("m2", "second", 4),
    ];
    let (first_tx, first_rx) = oneshot::channel();
    tokio::spawn(fake_gateway(listener, frames, first_tx));

    let shard = tokio::spawn(gateway::run(server.clone(), 0, 1));

    let identify = tokio::time::timeout(Duration::from_secs(2), first_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "QQBot mock-token");
    assert_eq!(identify["d"]["shard"], json!([0, 1]));

    let hub = server.hub.clone();
    let messages = || {
        hub.replay_after(0)
            .into_iter()
            .filter(|e| e.event_type == "message-created")
            .collect::<Vec<_>>()
    };
    assert!(wait_until(|| messages().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received = messages();
    assert_eq!(received.len(), 2);
    let contents: Vec<_> = received
        .iter()
        .map(|e| e.message.as_ref().unwrap().content.clone())
        .collect();
    assert_eq!(contents, ["first", "second"]);
    assert!(received[0].sn < received[1].sn);

    assert_eq!(server.logins.status(), LoginStatus::Online);
    assert_eq!(server.logins.self_id(), "10001");

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), shard)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.logins.status(), LoginStatus::Offline);
}
