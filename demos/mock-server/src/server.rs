//! Mock backend: REST routes plus the `/ws` telemetry channel.

use crate::tables::{Row, Table, TABLE_NAMES};
use crate::telemetry::{timestamp, ScanResult, Telemetry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scanlink_core::{
    ApiResponse, ClientMessage, DecodeError, ScannerAck, ScannerCommand, ServerMessage,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

pub struct Options {
    pub port: u16,
    pub tick: Duration,
    /// Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
    pub auth_token: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            port: 8080,
            tick: Duration::from_secs(2),
            allowed_origins: Vec::new(),
            auth_token: None,
        }
    }
}

pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

struct ServerState {
    telemetry: Telemetry,
    tables: HashMap<&'static str, Table>,
    config: Value,
}

impl ServerState {
    fn new() -> Self {
        Self {
            telemetry: Telemetry::new(),
            tables: TABLE_NAMES.iter().map(|&name| (name, Table::new())).collect(),
            config: json!({
                "vpn_type": "fortinet",
                "threads": 150,
                "timeout": 3,
                "max_retries": 3,
                "rate_limit": 5000,
                "auto_scale": true
            }),
        }
    }
}

#[derive(Clone)]
struct AppState {
    inner: Arc<RwLock<ServerState>>,
    broadcast_tx: broadcast::Sender<String>,
    options: Arc<Options>,
}

impl AppState {
    fn new(options: Options) -> Self {
        let (broadcast_tx, _) = broadcast::channel::<String>(100);
        Self {
            inner: Arc::new(RwLock::new(ServerState::new())),
            broadcast_tx,
            options: Arc::new(options),
        }
    }

    fn broadcast(&self, msg: &ServerMessage) {
        match msg.encode() {
            // No subscribers is fine.
            Ok(text) => {
                let _ = self.broadcast_tx.send(text);
            }
            Err(e) => tracing::warn!("Failed to encode {}: {}", msg.kind(), e),
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/servers", get(get_servers))
        .route("/api/logs", get(list_logs).post(append_log))
        .route("/api/results", get(list_results).post(add_result))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/start", post(start_scanner))
        .route("/api/stop", post(stop_scanner))
        .route("/api/{table}", get(list_rows).post(create_row))
        .route("/api/{table}/{id}", put(update_row).delete(delete_row))
        .route("/api/{table}/bulk_delete", post(bulk_delete))
        .with_state(state)
}

pub async fn run(options: Options) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", options.port);
    let tick = options.tick;
    let state = AppState::new(options);

    tokio::spawn(tick_loop(state.clone(), tick));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{} (ws at /ws)", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Perturb the telemetry every `period` and fan the frames out to every socket.
async fn tick_loop(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    let mut rng = StdRng::from_entropy();
    loop {
        interval.tick().await;
        let frames = state.inner.write().await.telemetry.tick(&mut rng);
        for frame in &frames {
            state.broadcast(frame);
        }
    }
}

// WebSocket

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => true,
    }
}

fn token_accepted(expected: Option<&str>, headers: &HeaderMap, query: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let presented = query.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    });
    presented == Some(expected)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&state.options.allowed_origins, &headers) {
        tracing::warn!("Rejected WebSocket from origin {:?}", headers.get(header::ORIGIN));
        return StatusCode::FORBIDDEN.into_response();
    }
    if !token_accepted(
        state.options.auth_token.as_deref(),
        &headers,
        query.token.as_deref(),
    ) {
        tracing::warn!("WebSocket authentication failed");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state).await {
            tracing::debug!("WebSocket session ended: {}", e);
        }
    })
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> anyhow::Result<()> {
    let text = msg.encode()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, state: AppState) -> anyhow::Result<()> {
    tracing::info!("WebSocket client connected");
    let (mut sink, mut stream) = socket.split();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    let snapshot = {
        let s = state.inner.read().await;
        [
            ServerMessage::InitialStats(s.telemetry.stats.clone()),
            ServerMessage::ServerInfo(s.telemetry.servers.clone()),
        ]
    };
    for msg in &snapshot {
        send(&mut sink, msg).await?;
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        if let Some(reply) = handle_command(&state, text.as_str()).await {
                            send(&mut sink, &reply).await?;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(text) => sink.send(Message::Text(text.into())).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Client lagged, skipped {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("WebSocket client disconnected");
    Ok(())
}

/// Reply to one client frame, if it warrants a reply.
async fn handle_command(state: &AppState, text: &str) -> Option<ServerMessage> {
    let cmd = match ClientMessage::decode(text) {
        Ok(cmd) => cmd,
        Err(DecodeError::UnknownType(kind)) => {
            tracing::warn!("Unknown message type: {}", kind);
            return None;
        }
        Err(e) => {
            tracing::warn!("Invalid message: {}", e);
            return None;
        }
    };

    let mut s = state.inner.write().await;
    let reply = match cmd {
        ClientMessage::StartScanner { vpn_type } => {
            tracing::info!("Starting scanner: {}", vpn_type);
            s.telemetry
                .log("info", &format!("Scanner {vpn_type} started"), "scanner");
            ServerMessage::ScannerStarted(ScannerAck {
                status: "success".into(),
                scanner: vpn_type,
            })
        }
        ClientMessage::StopScanner { vpn_type } => {
            tracing::info!("Stopping scanner: {}", vpn_type);
            s.telemetry
                .log("info", &format!("Scanner {vpn_type} stopped"), "scanner");
            ServerMessage::ScannerStopped(ScannerAck {
                status: "success".into(),
                scanner: vpn_type,
            })
        }
        ClientMessage::GetLogs { limit } => {
            ServerMessage::LogsData(s.telemetry.recent_logs(limit as usize))
        }
    };
    Some(reply)
}

// REST

type Reply = (StatusCode, Json<ApiResponse<Value>>);

fn ok(data: impl serde::Serialize) -> Reply {
    match serde_json::to_value(data) {
        Ok(value) => (StatusCode::OK, Json(ApiResponse::ok(value))),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn done() -> Reply {
    (StatusCode::OK, Json(ApiResponse::done()))
}

fn fail(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(ApiResponse::err(message)))
}

async fn health() -> Reply {
    ok(json!({
        "status": "ok",
        "server": "mock-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp(),
    }))
}

async fn get_stats(State(state): State<AppState>) -> Reply {
    ok(&state.inner.read().await.telemetry.stats)
}

async fn get_servers(State(state): State<AppState>) -> Reply {
    ok(&state.inner.read().await.telemetry.servers)
}

#[derive(Deserialize)]
struct Limit {
    limit: Option<usize>,
}

impl Limit {
    fn or_default(&self) -> usize {
        self.limit.filter(|&l| l > 0).unwrap_or(100)
    }
}

async fn list_logs(State(state): State<AppState>, Query(params): Query<Limit>) -> Reply {
    ok(state.inner.read().await.telemetry.recent_logs(params.or_default()))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NewLog {
    level: Option<String>,
    message: Option<String>,
    component: Option<String>,
}

async fn append_log(State(state): State<AppState>, Json(req): Json<NewLog>) -> Reply {
    let mut s = state.inner.write().await;
    let record = s.telemetry.log(
        req.level.as_deref().unwrap_or("info"),
        req.message.as_deref().unwrap_or("No message"),
        req.component.as_deref().unwrap_or("unknown"),
    );
    ok(record)
}

async fn list_results(State(state): State<AppState>, Query(params): Query<Limit>) -> Reply {
    let s = state.inner.read().await;
    let results = &s.telemetry.results;
    let skip = results.len().saturating_sub(params.or_default());
    ok(&results[skip..])
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct NewResult {
    ip: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(alias = "vpn_type")]
    vpn_type: Option<String>,
}

async fn add_result(State(state): State<AppState>, Json(req): Json<NewResult>) -> Reply {
    let unknown = || "unknown".to_string();
    let result = ScanResult {
        id: 0,
        ip: req.ip.unwrap_or_else(|| "0.0.0.0".to_string()),
        username: req.username.unwrap_or_else(unknown),
        password: req.password.unwrap_or_else(unknown),
        vpn_type: req.vpn_type.unwrap_or_else(unknown),
        timestamp: String::new(),
    };
    let stored = state.inner.write().await.telemetry.add_result(result);
    tracing::info!("New result from {} ({})", stored.ip, stored.vpn_type);
    ok(stored)
}

async fn get_config(State(state): State<AppState>) -> Reply {
    ok(&state.inner.read().await.config)
}

async fn set_config(State(state): State<AppState>, Json(config): Json<Value>) -> Reply {
    if !config.is_object() {
        return fail(StatusCode::BAD_REQUEST, "Invalid config");
    }
    state.inner.write().await.config = config.clone();
    state.broadcast(&ServerMessage::ConfigUpdate(config.clone()));
    tracing::info!("Configuration updated");
    ok(config)
}

async fn start_scanner(State(state): State<AppState>, Json(req): Json<Value>) -> Reply {
    scanner_command(&state, &req, "start", "starting").await
}

async fn stop_scanner(State(state): State<AppState>, Json(req): Json<Value>) -> Reply {
    scanner_command(&state, &req, "stop", "stopping").await
}

async fn scanner_command(state: &AppState, req: &Value, action: &str, status: &str) -> Reply {
    let Some(vpn_type) = req.get("vpn_type").and_then(Value::as_str) else {
        return fail(StatusCode::BAD_REQUEST, "vpn_type required");
    };
    let cmd = ScannerCommand {
        action: action.to_string(),
        vpn_type: vpn_type.to_string(),
        status: status.to_string(),
    };
    state.inner.write().await.telemetry.log(
        "info",
        &format!("Scanner {action} requested for {vpn_type}"),
        "api",
    );
    state.broadcast(&ServerMessage::ScannerCommand(cmd.clone()));
    ok(cmd)
}

fn unknown_table() -> Reply {
    fail(StatusCode::NOT_FOUND, "Unknown table")
}

async fn list_rows(State(state): State<AppState>, Path(table): Path<String>) -> Reply {
    let s = state.inner.read().await;
    match s.tables.get(table.as_str()) {
        Some(t) => ok(t.list()),
        None => unknown_table(),
    }
}

async fn create_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(fields): Json<Row>,
) -> Reply {
    let mut s = state.inner.write().await;
    match s.tables.get_mut(table.as_str()) {
        Some(t) => ok(t.create(fields)),
        None => unknown_table(),
    }
}

async fn update_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, u64)>,
    Json(fields): Json<Row>,
) -> Reply {
    let mut s = state.inner.write().await;
    let Some(t) = s.tables.get_mut(table.as_str()) else {
        return unknown_table();
    };
    match t.update(id, fields) {
        Some(row) => ok(row),
        None => fail(StatusCode::NOT_FOUND, "Item not found"),
    }
}

async fn delete_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, u64)>,
) -> Reply {
    let mut s = state.inner.write().await;
    let Some(t) = s.tables.get_mut(table.as_str()) else {
        return unknown_table();
    };
    if t.delete(id) {
        done()
    } else {
        fail(StatusCode::NOT_FOUND, "Item not found")
    }
}

async fn bulk_delete(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(req): Json<Value>,
) -> Reply {
    let Some(ids) = req.get("ids").and_then(Value::as_array) else {
        return fail(StatusCode::BAD_REQUEST, "Invalid request format");
    };
    let ids: Vec<u64> = ids.iter().filter_map(Value::as_u64).collect();
    let mut s = state.inner.write().await;
    let Some(t) = s.tables.get_mut(table.as_str()) else {
        return unknown_table();
    };
    let removed = t.bulk_delete(&ids);
    tracing::info!("Bulk deleted {} rows from {}", removed, table);
    done()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn stats_and_servers_are_wrapped() {
        let state = AppState::new(Options::default());
        let (status, body) = call(&state, "GET", "/api/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["goods"], 45);

        let (_, body) = call(&state, "GET", "/api/servers", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 4);
        assert_eq!(body["data"][0]["ip"], "194.0.234.203");
    }

    #[tokio::test]
    async fn crud_round() {
        let state = AppState::new(Options::default());
        let (_, body) = call(
            &state,
            "POST",
            "/api/proxies",
            Some(json!({"address": "10.0.0.1:3128"})),
        )
        .await;
        assert_eq!(body["data"]["id"], 1);

        let (status, body) = call(
            &state,
            "PUT",
            "/api/proxies/1",
            Some(json!({"address": "10.0.0.2:3128"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["address"], "10.0.0.2:3128");

        let (status, body) = call(&state, "PUT", "/api/proxies/9", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Item not found");

        let (status, _) = call(&state, "DELETE", "/api/proxies/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&state, "DELETE", "/api/proxies/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&state, "GET", "/api/widgets", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_delete_requires_id_array() {
        let state = AppState::new(Options::default());
        for n in 0..3 {
            call(&state, "POST", "/api/tasks", Some(json!({ "n": n }))).await;
        }
        let (status, body) = call(
            &state,
            "POST",
            "/api/tasks/bulk_delete",
            Some(json!({"ids": "1,2"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request format");

        let (status, _) = call(
            &state,
            "POST",
            "/api/tasks/bulk_delete",
            Some(json!({"ids": [1, 3]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&state, "GET", "/api/tasks", None).await;
        assert_eq!(body["data"], json!([{"id": 2, "n": 1}]));
    }

    #[tokio::test]
    async fn start_broadcasts_scanner_command() {
        let state = AppState::new(Options::default());
        let mut rx = state.broadcast_tx.subscribe();

        let (status, body) = call(&state, "POST", "/api/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "vpn_type required");

        let (status, _) = call(
            &state,
            "POST",
            "/api/start",
            Some(json!({"vpn_type": "cisco"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let frame = ServerMessage::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            frame,
            ServerMessage::ScannerCommand(ScannerCommand {
                action: "start".into(),
                vpn_type: "cisco".into(),
                status: "starting".into(),
            })
        );
    }

    #[tokio::test]
    async fn config_post_broadcasts_update() {
        let state = AppState::new(Options::default());
        let mut rx = state.broadcast_tx.subscribe();
        let config = json!({"threads": 300});
        let (status, _) = call(&state, "POST", "/api/config", Some(config.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let frame = ServerMessage::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame, ServerMessage::ConfigUpdate(config.clone()));
        let (_, body) = call(&state, "GET", "/api/config", None).await;
        assert_eq!(body["data"], config);
    }

    #[tokio::test]
    async fn logs_and_results() {
        let state = AppState::new(Options::default());
        let (_, body) = call(
            &state,
            "POST",
            "/api/logs",
            Some(json!({"message": "worker joined"})),
        )
        .await;
        assert_eq!(body["data"]["level"], "info");
        assert_eq!(body["data"]["component"], "unknown");

        let (_, body) = call(&state, "GET", "/api/logs?limit=1", None).await;
        assert_eq!(body["data"][0]["message"], "worker joined");

        let (_, body) = call(
            &state,
            "POST",
            "/api/results",
            Some(json!({"ip": "216.229.124.44:443", "vpnType": "paloalto"})),
        )
        .await;
        assert_eq!(body["data"]["username"], "unknown");
        let (_, body) = call(&state, "GET", "/api/stats", None).await;
        assert_eq!(body["data"]["goods"], 46);
    }

    #[tokio::test]
    async fn socket_commands_reply() {
        let state = AppState::new(Options::default());
        let reply = handle_command(&state, r#"{"type":"start_scanner","data":"fortinet"}"#).await;
        assert_eq!(
            reply,
            Some(ServerMessage::ScannerStarted(ScannerAck {
                status: "success".into(),
                scanner: "fortinet".into(),
            }))
        );

        let reply = handle_command(&state, r#"{"type":"get_logs","data":{"limit":2}}"#).await;
        assert!(matches!(reply, Some(ServerMessage::LogsData(lines)) if lines.len() == 2));

        assert_eq!(handle_command(&state, r#"{"type":"reboot"}"#).await, None);
        assert_eq!(handle_command(&state, "{oops").await, None);
    }

    #[test]
    fn origin_and_token_checks() {
        let mut headers = HeaderMap::new();
        assert!(origin_allowed(&[], &headers));
        let allowed = parse_origins(" http://localhost:5173 , https://dash.example ,");
        assert_eq!(allowed.len(), 2);
        assert!(origin_allowed(&allowed, &headers));
        headers.insert(header::ORIGIN, "https://evil.example".parse().unwrap());
        assert!(!origin_allowed(&allowed, &headers));
        headers.insert(header::ORIGIN, "https://dash.example".parse().unwrap());
        assert!(origin_allowed(&allowed, &headers));

        assert!(token_accepted(None, &headers, None));
        assert!(!token_accepted(Some("s3cret"), &headers, None));
        assert!(token_accepted(Some("s3cret"), &headers, Some("s3cret")));
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(token_accepted(Some("s3cret"), &headers, None));
        assert!(!token_accepted(Some("s3cret"), &headers, Some("wrong")));
    }
}
