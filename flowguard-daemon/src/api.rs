//! Operator API — REST listings and live websocket channels.
//!
//! This is the boundary surface over the core: paginated flow/alert
//! listings backed by the in-memory store, a rules view, and the two
//! websocket fan-outs (live flows via the broadcaster, live alerts via
//! the store's pub/sub).
//!
//! Websocket lifecycle: the writer drains the subscriber outbox with a
//! 10 s write deadline and pings every 30 s; the reader only detects
//! close and refreshes the 24 h read deadline on pong. Either side
//! failing tears the subscriber down.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use flowguard_core::types::Severity;
use flowguard_stream::{AlertFilter, FlowBroadcaster, FlowFilter, GuardStore, RuleUpdate};

const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<GuardStore>,
    pub broadcaster: Arc<FlowBroadcaster>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/flows", get(get_flows))
        .route("/api/v1/flows/stats", get(get_flow_stats))
        .route("/api/v1/flows/:id", get(get_flow))
        .route("/api/v1/alerts", get(get_alerts))
        .route("/api/v1/alerts/timeline", get(get_alerts_timeline))
        .route("/api/v1/alerts/:id", get(get_alert))
        .route("/api/v1/rules", get(get_rules))
        .route("/api/v1/rules/stats", get(get_rules_stats))
        .route("/api/v1/rules/:id", get(get_rule).put(update_rule))
        .route("/ws/flows", get(ws_flows))
        .route("/ws/alerts", get(ws_alerts))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// --- flows ---

#[derive(Debug, Default, Deserialize)]
struct FlowsQuery {
    page: Option<usize>,
    limit: Option<usize>,
    namespace: Option<String>,
    verdict: Option<String>,
    search: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn get_flows(
    State(state): State<ApiState>,
    Query(query): Query<FlowsQuery>,
) -> impl IntoResponse {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(25).clamp(1, 100);
    let filter = FlowFilter {
        namespace: non_empty(query.namespace),
        verdict: non_empty(query.verdict),
        search: non_empty(query.search),
    };

    let (items, total) = state.store.flows(page, limit, &filter);
    Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "limit": limit,
    }))
}

async fn get_flow(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.flow(&id) {
        Some(flow) => Json(flow).into_response(),
        None => (StatusCode::NOT_FOUND, "flow not found").into_response(),
    }
}

async fn get_flow_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.flow_stats())
}

// --- alerts ---

#[derive(Debug, Default, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
    severity: Option<String>,
    namespace: Option<String>,
    #[serde(rename = "type")]
    alert_type: Option<String>,
    search: Option<String>,
}

fn alert_filter(query: AlertsQuery) -> AlertFilter {
    AlertFilter {
        severity: query
            .severity
            .as_deref()
            .and_then(Severity::from_str_loose),
        namespace: non_empty(query.namespace),
        alert_type: non_empty(query.alert_type),
        search: non_empty(query.search),
    }
}

async fn get_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let items = state.store.alerts(limit, &alert_filter(query));
    Json(json!({
        "items": items,
        "limit": limit,
    }))
}

async fn get_alert(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.alert(&id) {
        Some(alert) => Json(alert).into_response(),
        None => (StatusCode::NOT_FOUND, "alert not found").into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TimelineQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn get_alerts_timeline(
    State(state): State<ApiState>,
    Query(query): Query<TimelineQuery>,
) -> impl IntoResponse {
    let items = state.store.alerts_timeline(query.start, query.end);
    Json(json!({ "items": items }))
}

// --- rules ---

async fn get_rules(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "items": state.store.rules() }))
}

async fn get_rules_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.rules_stats())
}

async fn get_rule(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.rule(&id) {
        Some(rule) => Json(rule).into_response(),
        None => (StatusCode::NOT_FOUND, "rule not found").into_response(),
    }
}

async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<RuleUpdate>,
) -> impl IntoResponse {
    if !state.store.update_rule(&id, &update) {
        return (StatusCode::NOT_FOUND, "rule not found").into_response();
    }
    match state.store.rule(&id) {
        Some(rule) => Json(rule).into_response(),
        None => (StatusCode::NOT_FOUND, "rule not found").into_response(),
    }
}

// --- websockets ---

async fn ws_flows(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let subscription = state.broadcaster.add_subscriber();
        let id = subscription.id;
        pump_socket(socket, subscription.rx).await;
        state.broadcaster.remove_subscriber(id);
    })
}

async fn ws_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let subscription = state.store.subscribe_alerts(alert_filter(query));
        let id = subscription.id;
        pump_socket(socket, subscription.rx).await;
        state.store.unsubscribe_alerts(id);
    })
}

/// Drive one websocket subscriber until it breaks.
///
/// The reader task only detects close and refreshes the read deadline on
/// pong. The writer drains the outbox as one JSON object per message with
/// a 10 s write deadline; a missed deadline or write error ends the
/// subscriber and closes the connection.
async fn pump_socket<T: serde::Serialize>(socket: WebSocket, mut outbox: mpsc::Receiver<T>) {
    let (mut sender, mut receiver) = socket.split();

    let last_pong = Arc::new(Mutex::new(Instant::now()));
    let pong_seen = Arc::clone(&last_pong);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Pong(_) => {
                    *pong_seen.lock().expect("pong clock poisoned") = Instant::now();
                }
                Message::Close(_) => return,
                _ => {}
            }
        }
    });

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut reader => break,
            item = outbox.recv() => {
                let Some(item) = item else { break };
                let Ok(payload) = serde_json::to_string(&item) else { continue };
                match tokio::time::timeout(WRITE_DEADLINE, sender.send(Message::Text(payload))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "websocket write failed, dropping subscriber");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!("websocket write deadline exceeded, dropping subscriber");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_pong.lock().expect("pong clock poisoned").elapsed() > READ_DEADLINE {
                    tracing::debug!("websocket read deadline exceeded, dropping subscriber");
                    break;
                }
                match tokio::time::timeout(WRITE_DEADLINE, sender.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    reader.abort();
    let _ = sender.close().await;
}
