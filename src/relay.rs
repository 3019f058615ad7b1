//! Browser control relay: a loopback-only multiplexer between one
//! upstream controller extension and many downstream debug-protocol
//! clients.
//!
//! The upstream connects over `/extension`; downstream clients discover
//! the relay via `GET /json/version` and connect to `/cdp`. Commands the
//! relay cannot serve locally are wrapped as `forwardCDPCommand` frames
//! with relay-assigned ids; upstream replies are matched by id and
//! unwrapped back to the originating client. Session-attached events fan
//! out to every downstream client, and freshly connected clients learn
//! existing page targets through synthetic attach/created events.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::StopSignal;

const UPSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: &str = "1.3";
const BROWSER_NAME: &str = "switchboard/browser-relay";

/// Relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Relay configuration; loopback only.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18_792,
        }
    }
}

/// Frame pushed to a downstream client's writer.
enum DownstreamFrame {
    Text(String),
    ServiceUnavailable,
}

/// A known page target, keyed by its debug session id.
#[derive(Debug, Clone)]
struct TargetRecord {
    session_id: String,
    target_id: String,
    target_info: Value,
}

struct RelayState {
    upstream: RwLock<Option<mpsc::UnboundedSender<String>>>,
    downstream: DashMap<u64, mpsc::UnboundedSender<DownstreamFrame>>,
    next_client_id: AtomicU64,
    pending: DashMap<i64, oneshot::Sender<Result<Value, String>>>,
    next_request_id: AtomicI64,
    targets: RwLock<HashMap<String, TargetRecord>>,
}

impl RelayState {
    fn new() -> Self {
        Self {
            upstream: RwLock::new(None),
            downstream: DashMap::new(),
            next_client_id: AtomicU64::new(1),
            pending: DashMap::new(),
            next_request_id: AtomicI64::new(1),
            targets: RwLock::new(HashMap::new()),
        }
    }

    fn upstream_connected(&self) -> bool {
        self.upstream.read().expect("upstream lock").is_some()
    }

    /// Best-effort broadcast to every downstream client.
    fn broadcast(&self, event: &Value) {
        let frame = event.to_string();
        for client in self.downstream.iter() {
            let _ = client.value().send(DownstreamFrame::Text(frame.clone()));
        }
    }

    /// Forward a wrapped command upstream and await the matched reply.
    async fn send_to_upstream(&self, mut payload: Value) -> Result<Value, String> {
        let sender = self
            .upstream
            .read()
            .expect("upstream lock")
            .clone()
            .ok_or_else(|| "extension not connected".to_string())?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        payload["id"] = json!(request_id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if sender.send(payload.to_string()).is_err() {
            self.pending.remove(&request_id);
            return Err("extension not connected".to_string());
        }

        match tokio::time::timeout(UPSTREAM_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("extension disconnected".to_string()),
            Err(_) => {
                self.pending.remove(&request_id);
                Err("upstream request timed out".to_string())
            }
        }
    }

    /// Replay the current target table to one client: synthetic attach
    /// events for `autoAttach`, target-created events for `discover`.
    fn replay_targets(&self, client: &mpsc::UnboundedSender<DownstreamFrame>, mode: &str) {
        let targets: Vec<TargetRecord> = self
            .targets
            .read()
            .expect("targets lock")
            .values()
            .cloned()
            .collect();

        for target in targets {
            let mut info = target.target_info.clone();
            info["attached"] = json!(true);
            let event = if mode == "autoAttach" {
                json!({
                    "method": "Target.attachedToTarget",
                    "params": {
                        "sessionId": target.session_id,
                        "targetInfo": info,
                        "waitingForDebugger": false,
                    },
                })
            } else {
                json!({
                    "method": "Target.targetCreated",
                    "params": { "targetInfo": info },
                })
            };
            let _ = client.send(DownstreamFrame::Text(event.to_string()));
        }
    }

    /// Handle one event received from the upstream.
    fn handle_upstream_event(&self, method: &str, params: Value, session_id: Option<Value>) {
        match method {
            "Target.attachedToTarget" => {
                let target_type = params["targetInfo"]["type"].as_str().unwrap_or("page");
                if target_type != "page" {
                    return;
                }
                let (Some(sid), Some(tid)) = (
                    params["sessionId"].as_str().map(str::to_string),
                    params["targetInfo"]["targetId"].as_str().map(str::to_string),
                ) else {
                    return;
                };

                let (previous_target_id, stale_sessions) = {
                    let mut targets = self.targets.write().expect("targets lock");
                    let previous = targets
                        .get(&sid)
                        .map(|existing| existing.target_id.clone());
                    // The same target re-attaching under a new session
                    // supersedes the old session entirely.
                    let stale: Vec<String> = targets
                        .values()
                        .filter(|t| t.target_id == tid && t.session_id != sid)
                        .map(|t| t.session_id.clone())
                        .collect();
                    for old_session in &stale {
                        targets.remove(old_session);
                    }
                    targets.insert(
                        sid.clone(),
                        TargetRecord {
                            session_id: sid.clone(),
                            target_id: tid.clone(),
                            target_info: params["targetInfo"].clone(),
                        },
                    );
                    (previous, stale)
                };

                for old_session in &stale_sessions {
                    self.broadcast(&json!({
                        "method": "Target.detachedFromTarget",
                        "params": { "sessionId": old_session, "targetId": tid },
                        "sessionId": old_session,
                    }));
                }

                let changed = previous_target_id
                    .as_ref()
                    .is_some_and(|prev| prev != &tid);
                let previous_target_id_was_none = previous_target_id.is_none();
                if changed {
                    let prev = previous_target_id.expect("checked above");
                    self.broadcast(&json!({
                        "method": "Target.detachedFromTarget",
                        "params": { "sessionId": sid, "targetId": prev },
                        "sessionId": sid,
                    }));
                }
                if previous_target_id_was_none || changed || !stale_sessions.is_empty() {
                    self.broadcast(&json!({
                        "method": method,
                        "params": params,
                        "sessionId": sid,
                    }));
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(sid) = params["sessionId"].as_str() {
                    self.targets.write().expect("targets lock").remove(sid);
                }
                self.broadcast(&json!({
                    "method": method,
                    "params": params,
                    "sessionId": session_id,
                }));
            }
            "Target.targetInfoChanged" => {
                let info = params["targetInfo"].clone();
                let tid = info["targetId"].as_str().map(str::to_string);
                let is_page = info["type"].as_str().unwrap_or("page") == "page";
                if let (Some(tid), true) = (tid, is_page) {
                    let mut targets = self.targets.write().expect("targets lock");
                    for target in targets.values_mut() {
                        if target.target_id == tid {
                            merge_object(&mut target.target_info, &info);
                        }
                    }
                }
                self.broadcast(&json!({
                    "method": method,
                    "params": params,
                    "sessionId": session_id,
                }));
            }
            _ => {
                self.broadcast(&json!({
                    "method": method,
                    "params": params,
                    "sessionId": session_id,
                }));
            }
        }
    }

    /// Serve a command locally when possible; `None` means forward it.
    fn route_locally(&self, method: &str, params: &Value, session_id: Option<&str>) -> Option<Result<Value, String>> {
        match method {
            "Browser.getVersion" => Some(Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "product": format!("Chrome/{BROWSER_NAME}"),
                "revision": "0",
                "userAgent": BROWSER_NAME,
                "jsVersion": "V8",
            }))),
            "Browser.setDownloadBehavior"
            | "Target.setAutoAttach"
            | "Target.setDiscoverTargets" => Some(Ok(json!({}))),
            "Target.getTargets" => {
                let targets = self.targets.read().expect("targets lock");
                let infos: Vec<Value> = targets
                    .values()
                    .map(|t| {
                        let mut info = t.target_info.clone();
                        info["attached"] = json!(true);
                        info
                    })
                    .collect();
                Some(Ok(json!({ "targetInfos": infos })))
            }
            "Target.getTargetInfo" => {
                let targets = self.targets.read().expect("targets lock");
                if let Some(target_id) = params["targetId"].as_str() {
                    if let Some(target) =
                        targets.values().find(|t| t.target_id == target_id)
                    {
                        return Some(Ok(json!({ "targetInfo": target.target_info })));
                    }
                }
                if let Some(sid) = session_id {
                    if let Some(target) = targets.get(sid) {
                        return Some(Ok(json!({ "targetInfo": target.target_info })));
                    }
                }
                if let Some(first) = targets.values().next() {
                    return Some(Ok(json!({ "targetInfo": first.target_info })));
                }
                Some(Ok(json!({
                    "targetInfo": { "targetId": "", "type": "page", "title": "", "url": "" },
                })))
            }
            "Target.attachToTarget" => {
                let Some(target_id) = params["targetId"].as_str() else {
                    return Some(Err("targetId required".to_string()));
                };
                let targets = self.targets.read().expect("targets lock");
                match targets.values().find(|t| t.target_id == target_id) {
                    Some(target) => Some(Ok(json!({ "sessionId": target.session_id }))),
                    None => Some(Err("target not found".to_string())),
                }
            }
            _ => None,
        }
    }

    /// Upstream is gone: fail every pending request, forget every
    /// target, and close every downstream client.
    fn on_upstream_disconnect(&self) {
        *self.upstream.write().expect("upstream lock") = None;

        let pending: Vec<i64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in pending {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err("extension disconnected".to_string()));
            }
        }

        self.targets.write().expect("targets lock").clear();

        let clients: Vec<u64> = self.downstream.iter().map(|e| *e.key()).collect();
        for id in clients {
            if let Some((_, client)) = self.downstream.remove(&id) {
                let _ = client.send(DownstreamFrame::ServiceUnavailable);
            }
        }
    }
}

fn merge_object(base: &mut Value, update: &Value) {
    if let (Some(base_map), Some(update_map)) = (base.as_object_mut(), update.as_object()) {
        for (key, value) in update_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
}

/// The relay service: HTTP discovery surface plus the two WebSocket
/// endpoints.
pub struct BrowserRelay {
    config: RelayConfig,
    state: Arc<RelayState>,
    stop: StopSignal,
    server: Mutex<Option<JoinHandle<()>>>,
    bound_addr: RwLock<Option<SocketAddr>>,
}

impl BrowserRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: Arc::new(RelayState::new()),
            stop: StopSignal::new(),
            server: Mutex::new(None),
            bound_addr: RwLock::new(None),
        }
    }

    /// The actually bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.read().expect("addr lock")
    }

    pub async fn start(&self) -> Result<(), RelayError> {
        self.stop.reset();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr: addr.clone(), source })?;
        let bound = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;
        *self.bound_addr.write().expect("addr lock") = Some(bound);

        let app = router(Arc::clone(&self.state));
        let stop = self.stop.clone();
        let server = tokio::spawn(async move {
            let shutdown = async move { stop.wait().await };
            if let Err(error) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
            {
                error!(%error, "relay server error");
            }
        });
        *self.server.lock().expect("server lock") = Some(server);

        info!(%bound, "browser relay started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.stop.trigger();
        let server = self.server.lock().expect("server lock").take();
        if let Some(mut server) = server {
            if tokio::time::timeout(Duration::from_secs(5), &mut server)
                .await
                .is_err()
            {
                warn!("relay did not stop in time, cancelling");
                server.abort();
            }
        }
        info!("browser relay stopped");
    }
}

fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", any(handle_root))
        .route("/extension/status", get(handle_extension_status))
        .route("/json/version", any(handle_json_version))
        .route("/json/version/", any(handle_json_version))
        .route("/json", get(handle_json_list))
        .route("/json/", get(handle_json_list))
        .route("/json/list", get(handle_json_list))
        .route("/json/list/", get(handle_json_list))
        .route("/json/activate/{target_id}", any(handle_json_activate))
        .route("/json/close/{target_id}", any(handle_json_close))
        .route("/extension", get(handle_upstream_ws))
        .route("/cdp", get(handle_downstream_ws))
        .layer(middleware::from_fn(loopback_guard))
        .with_state(state)
}

/// Refuse any non-loopback peer at the middleware layer.
async fn loopback_guard(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if addr.ip().is_loopback() {
        next.run(request).await
    } else {
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

async fn handle_root() -> impl IntoResponse {
    "OK"
}

async fn handle_extension_status(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    axum::Json(json!({ "connected": state.upstream_connected() }))
}

fn host_from_headers(headers: &HeaderMap, config_fallback: &str) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(config_fallback)
        .to_string()
}

async fn handle_json_version(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = host_from_headers(&headers, "127.0.0.1:18792");
    let mut payload = json!({
        "Browser": BROWSER_NAME,
        "Protocol-Version": PROTOCOL_VERSION,
    });
    if state.upstream_connected() {
        payload["webSocketDebuggerUrl"] = json!(format!("ws://{host}/cdp"));
    }
    axum::Json(payload)
}

async fn handle_json_list(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = host_from_headers(&headers, "127.0.0.1:18792");
    let cdp_url = format!("ws://{host}/cdp");
    let targets = state.targets.read().expect("targets lock");
    let list: Vec<Value> = targets
        .values()
        .map(|t| {
            json!({
                "id": t.target_id,
                "type": t.target_info["type"].as_str().unwrap_or("page"),
                "title": t.target_info["title"].as_str().unwrap_or(""),
                "description": t.target_info["title"].as_str().unwrap_or(""),
                "url": t.target_info["url"].as_str().unwrap_or(""),
                "webSocketDebuggerUrl": cdp_url,
                "devtoolsFrontendUrl":
                    format!("/devtools/inspector.html?ws={}", cdp_url.replace("ws://", "")),
            })
        })
        .collect();
    axum::Json(json!(list))
}

async fn handle_json_activate(
    State(state): State<Arc<RelayState>>,
    Path(target_id): Path<String>,
) -> impl IntoResponse {
    forward_target_command(&state, "Target.activateTarget", &target_id).await;
    "OK"
}

async fn handle_json_close(
    State(state): State<Arc<RelayState>>,
    Path(target_id): Path<String>,
) -> impl IntoResponse {
    forward_target_command(&state, "Target.closeTarget", &target_id).await;
    "OK"
}

/// Best-effort forward for the activate/close HTTP endpoints.
async fn forward_target_command(state: &RelayState, method: &str, target_id: &str) {
    let payload = json!({
        "method": "forwardCDPCommand",
        "params": {
            "method": method,
            "params": { "targetId": target_id },
        },
    });
    if let Err(error) = state.send_to_upstream(payload).await {
        debug!(%error, method, "target command not delivered");
    }
}

// ---- upstream: /extension ----

async fn handle_upstream_ws(
    State(state): State<Arc<RelayState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if state.upstream_connected() {
        return (StatusCode::CONFLICT, "Extension already connected").into_response();
    }
    upgrade.on_upgrade(move |socket| upstream_connection(state, socket))
}

async fn upstream_connection(state: Arc<RelayState>, socket: WebSocket) {
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    {
        let mut upstream = state.upstream.write().expect("upstream lock");
        if upstream.is_some() {
            // Lost the race with a concurrent connect.
            return;
        }
        *upstream = Some(outbox.clone());
    }
    info!("extension connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let ping_outbox = outbox.clone();
    let ping = tokio::spawn(async move {
        loop {
            tokio::time::sleep(PING_INTERVAL).await;
            if ping_outbox
                .send(json!({ "method": "ping" }).to_string())
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if !message.is_object() {
            continue;
        }

        // Keepalive from the extension.
        if message["method"] == "ping" {
            let _ = outbox.send(json!({ "method": "pong" }).to_string());
            continue;
        }
        if message["method"] == "pong" {
            continue;
        }

        // Reply to a forwarded command.
        if let Some(id) = message["id"].as_i64() {
            if let Some((_, tx)) = state.pending.remove(&id) {
                let outcome = if message["error"].is_null() {
                    Ok(message["result"].clone())
                } else {
                    Err(message["error"].to_string())
                };
                let _ = tx.send(outcome);
            }
            continue;
        }

        // Wrapped event from the controlled browser.
        if message["method"] == "forwardCDPEvent" {
            let params = &message["params"];
            let Some(event_method) = params["method"].as_str() else {
                continue;
            };
            state.handle_upstream_event(
                event_method,
                params["params"].clone(),
                Some(params["sessionId"].clone()),
            );
        }
    }

    ping.abort();
    writer.abort();
    state.on_upstream_disconnect();
    info!("extension disconnected");
}

// ---- downstream: /cdp ----

async fn handle_downstream_ws(
    State(state): State<Arc<RelayState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !state.upstream_connected() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Extension not connected").into_response();
    }
    upgrade.on_upgrade(move |socket| downstream_connection(state, socket))
}

async fn downstream_connection(state: Arc<RelayState>, socket: WebSocket) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::SeqCst);
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<DownstreamFrame>();
    state.downstream.insert(client_id, outbox.clone());
    info!(client_id, "cdp client connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            match frame {
                DownstreamFrame::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                DownstreamFrame::ServiceUnavailable => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 1011,
                            reason: "extension disconnected".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(command) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let (Some(command_id), Some(method)) =
            (command["id"].as_i64(), command["method"].as_str().map(str::to_string))
        else {
            continue;
        };
        let session_id = command["sessionId"].clone();
        let params = command["params"].clone();

        if !state.upstream_connected() {
            let _ = outbox.send(DownstreamFrame::Text(
                json!({
                    "id": command_id,
                    "sessionId": session_id,
                    "error": { "message": "Extension not connected" },
                })
                .to_string(),
            ));
            continue;
        }

        let outcome = match state.route_locally(&method, &params, session_id.as_str()) {
            Some(outcome) => outcome,
            None => {
                state
                    .send_to_upstream(json!({
                        "method": "forwardCDPCommand",
                        "params": {
                            "method": method,
                            "sessionId": session_id.clone(),
                            "params": params.clone(),
                        },
                    }))
                    .await
            }
        };

        // New clients learn the existing tabs through a synthetic
        // replay keyed off their first subscription command.
        if method == "Target.setAutoAttach" && session_id.is_null() {
            state.replay_targets(&outbox, "autoAttach");
        }
        if method == "Target.setDiscoverTargets" && params["discover"] == json!(true) {
            state.replay_targets(&outbox, "discover");
        }
        if method == "Target.attachToTarget" {
            if let Some(target_id) = params["targetId"].as_str() {
                let target = state
                    .targets
                    .read()
                    .expect("targets lock")
                    .values()
                    .find(|t| t.target_id == target_id)
                    .cloned();
                if let Some(target) = target {
                    let mut info = target.target_info.clone();
                    info["attached"] = json!(true);
                    let _ = outbox.send(DownstreamFrame::Text(
                        json!({
                            "method": "Target.attachedToTarget",
                            "params": {
                                "sessionId": target.session_id,
                                "targetInfo": info,
                                "waitingForDebugger": false,
                            },
                        })
                        .to_string(),
                    ));
                }
            }
        }

        let reply = match outcome {
            Ok(result) => json!({
                "id": command_id,
                "sessionId": session_id,
                "result": result,
            }),
            Err(message) => json!({
                "id": command_id,
                "sessionId": session_id,
                "error": { "message": message },
            }),
        };
        let _ = outbox.send(DownstreamFrame::Text(reply.to_string()));
    }

    state.downstream.remove(&client_id);
    writer.abort();
    info!(client_id, "cdp client disconnected");
}
