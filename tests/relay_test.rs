//! Browser relay integration tests over real HTTP and WebSocket
//! connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use switchboard::relay::{BrowserRelay, RelayConfig};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (BrowserRelay, SocketAddr) {
    let relay = BrowserRelay::new(RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    });
    relay.start().await.expect("relay starts");
    let addr = relay.local_addr().expect("bound address");
    (relay, addr)
}

async fn connect(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("websocket connects");
    ws
}

/// Read the next JSON frame, skipping relay keepalive pings.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).expect("frame is json");
            if value["method"] == "ping" {
                continue;
            }
            return value;
        }
    }
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send ok");
}

fn attach_event(session: &str, target: &str) -> Value {
    json!({
        "method": "forwardCDPEvent",
        "params": {
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": session,
                "targetInfo": {
                    "targetId": target,
                    "type": "page",
                    "title": "Example",
                    "url": "https://example.test/",
                },
                "waitingForDebugger": false,
            },
            "sessionId": session,
        },
    })
}

#[tokio::test]
async fn json_version_advertises_debugger_url_only_with_upstream() {
    let (relay, addr) = start_relay().await;
    let client = reqwest::Client::new();

    let before: Value = client
        .get(format!("http://{addr}/json/version"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["Protocol-Version"], "1.3");
    assert!(before.get("webSocketDebuggerUrl").is_none());

    let _upstream = connect(addr, "/extension").await;
    let after: Value = client
        .get(format!("http://{addr}/json/version"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = after["webSocketDebuggerUrl"].as_str().unwrap();
    assert!(url.starts_with("ws://"));
    assert!(url.ends_with("/cdp"));

    drop(_upstream);
    relay.stop().await;
}

#[tokio::test]
async fn root_and_status_report_aliveness() {
    let (relay, addr) = start_relay().await;
    let client = reqwest::Client::new();

    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert!(root.status().is_success());

    let status: Value = client
        .get(format!("http://{addr}/extension/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connected"], false);

    relay.stop().await;
}

#[tokio::test]
async fn second_upstream_connection_is_refused() {
    let (relay, addr) = start_relay().await;
    let _first = connect(addr, "/extension").await;

    let second = connect_async(format!("ws://{addr}/extension")).await;
    assert!(second.is_err());

    drop(_first);
    relay.stop().await;
}

#[tokio::test]
async fn cdp_requires_a_connected_upstream() {
    let (relay, addr) = start_relay().await;
    let attempt = connect_async(format!("ws://{addr}/cdp")).await;
    assert!(attempt.is_err());
    relay.stop().await;
}

#[tokio::test]
async fn auto_attach_replays_known_targets_and_session_replacement_fans_out() {
    let (relay, addr) = start_relay().await;

    let mut upstream = connect(addr, "/extension").await;
    send_json(&mut upstream, attach_event("S1", "T1")).await;
    // Give the relay a beat to record the target.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect(addr, "/cdp").await;
    send_json(
        &mut client,
        json!({ "id": 1, "method": "Target.setAutoAttach", "params": { "autoAttach": true } }),
    )
    .await;

    // Expect the synthetic attach for the known target plus the command
    // reply, in either order.
    let mut saw_attach = false;
    let mut saw_reply = false;
    for _ in 0..2 {
        let frame = next_json(&mut client).await;
        if frame["method"] == "Target.attachedToTarget" {
            assert_eq!(frame["params"]["sessionId"], "S1");
            assert_eq!(frame["params"]["targetInfo"]["targetId"], "T1");
            assert_eq!(frame["params"]["waitingForDebugger"], false);
            saw_attach = true;
        } else if frame["id"] == 1 {
            assert!(frame["error"].is_null());
            saw_reply = true;
        }
    }
    assert!(saw_attach && saw_reply);

    // The same target re-attaching under a new session: the relay emits
    // a detach for the stale session, then the new attach.
    send_json(&mut upstream, attach_event("S2", "T1")).await;

    let detach = next_json(&mut client).await;
    assert_eq!(detach["method"], "Target.detachedFromTarget");
    assert_eq!(detach["params"]["sessionId"], "S1");
    assert_eq!(detach["params"]["targetId"], "T1");

    let attach = next_json(&mut client).await;
    assert_eq!(attach["method"], "Target.attachedToTarget");
    assert_eq!(attach["params"]["sessionId"], "S2");

    drop(client);
    drop(upstream);
    relay.stop().await;
}

#[tokio::test]
async fn commands_are_wrapped_forwarded_and_unwrapped() {
    let (relay, addr) = start_relay().await;

    let mut upstream = connect(addr, "/extension").await;
    send_json(&mut upstream, attach_event("S1", "T1")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect(addr, "/cdp").await;
    send_json(
        &mut client,
        json!({
            "id": 42,
            "method": "Page.navigate",
            "sessionId": "S1",
            "params": { "url": "https://example.test/next" },
        }),
    )
    .await;

    // The upstream sees the wrapped command with a relay-assigned id.
    let forwarded = next_json(&mut upstream).await;
    assert_eq!(forwarded["method"], "forwardCDPCommand");
    assert_eq!(forwarded["params"]["method"], "Page.navigate");
    assert_eq!(forwarded["params"]["sessionId"], "S1");
    let relay_id = forwarded["id"].as_i64().unwrap();

    // Reply by relay id; the client gets it under its own id.
    send_json(
        &mut upstream,
        json!({ "id": relay_id, "result": { "frameId": "F1" } }),
    )
    .await;

    let reply = next_json(&mut client).await;
    assert_eq!(reply["id"], 42);
    assert_eq!(reply["sessionId"], "S1");
    assert_eq!(reply["result"]["frameId"], "F1");

    drop(client);
    drop(upstream);
    relay.stop().await;
}

#[tokio::test]
async fn locally_served_commands_never_reach_upstream() {
    let (relay, addr) = start_relay().await;

    let mut upstream = connect(addr, "/extension").await;
    send_json(&mut upstream, attach_event("S1", "T1")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect(addr, "/cdp").await;
    send_json(&mut client, json!({ "id": 2, "method": "Browser.getVersion" })).await;
    let version = next_json(&mut client).await;
    assert_eq!(version["id"], 2);
    assert_eq!(version["result"]["protocolVersion"], "1.3");

    send_json(&mut client, json!({ "id": 3, "method": "Target.getTargets" })).await;
    let targets = next_json(&mut client).await;
    assert_eq!(targets["result"]["targetInfos"].as_array().unwrap().len(), 1);

    send_json(
        &mut client,
        json!({ "id": 4, "method": "Target.attachToTarget", "params": { "targetId": "T1" } }),
    )
    .await;
    // attachToTarget emits a synthetic attach event plus the reply.
    let mut saw_session = false;
    for _ in 0..2 {
        let frame = next_json(&mut client).await;
        if frame["id"] == 4 {
            assert_eq!(frame["result"]["sessionId"], "S1");
            saw_session = true;
        }
    }
    assert!(saw_session);

    drop(client);
    drop(upstream);
    relay.stop().await;
}

#[tokio::test]
async fn upstream_disconnect_closes_downstream_clients() {
    let (relay, addr) = start_relay().await;

    let upstream = connect(addr, "/extension").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut client = connect(addr, "/cdp").await;

    drop(upstream);

    // The client connection must end (close frame or stream end).
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok());

    drop(client);
    relay.stop().await;
}

#[tokio::test]
async fn json_list_reflects_connected_targets() {
    let (relay, addr) = start_relay().await;
    let client = reqwest::Client::new();

    let mut upstream = connect(addr, "/extension").await;
    send_json(&mut upstream, attach_event("S1", "T1")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let list: Value = client
        .get(format!("http://{addr}/json/list"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = list.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "T1");
    assert_eq!(entries[0]["url"], "https://example.test/");
    assert!(entries[0]["webSocketDebuggerUrl"].as_str().unwrap().ends_with("/cdp"));

    drop(upstream);
    relay.stop().await;
}
