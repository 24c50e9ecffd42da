use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::rest::auth;
use crate::engine::assignment::AssignmentNotifier;
use crate::geo::GeoPoint;
use crate::models::assignment::{AssignmentDescription, AssignmentNotice};
use crate::models::order::OrderStatus;
use crate::models::user::AuthUser;
use crate::registry::{ClientHandle, ConnectionRegistry, OutboundChannel, SendError};
use crate::state::AppState;

const MESSAGE_TYPE_HEARTBEAT: &str = "heartbeat";
const MESSAGE_TYPE_ASSIGNMENT_ACK: &str = "assignment_ack";

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/heartbeat", get(heartbeat_socket))
        .route_layer(middleware::from_fn(auth::require_drone))
        .route_layer(middleware::from_fn_with_state(state, auth::authenticate))
}

/// The write half of an upgraded drone socket, as the registry sees it.
struct WsChannel {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl OutboundChannel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), String> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|err| err.to_string())
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// Pushes assignment notices through the connection registry in the wire
/// format drones speak.
pub struct WsNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl WsNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl AssignmentNotifier for WsNotifier {
    async fn notify(&self, notice: AssignmentNotice) -> Result<(), SendError> {
        let message = AssignmentMessage::new(&notice);
        self.registry.send(notice.drone_id, &message).await
    }
}

#[derive(Serialize)]
struct AssignmentMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    drone_id: i64,
    order_id: i64,
    pickup_lat: f64,
    pickup_lng: f64,
    dropoff_lat: f64,
    dropoff_lng: f64,
    enduser_id: i64,
    order_status: OrderStatus,
    created_at: DateTime<Utc>,
    description: AssignmentDescription,
}

impl AssignmentMessage {
    fn new(notice: &AssignmentNotice) -> Self {
        Self {
            kind: "assignment",
            drone_id: notice.drone_id,
            order_id: notice.order_id,
            pickup_lat: notice.pickup_lat,
            pickup_lng: notice.pickup_lng,
            dropoff_lat: notice.dropoff_lat,
            dropoff_lng: notice.dropoff_lng,
            enduser_id: notice.enduser_id,
            order_status: notice.order_status,
            created_at: Utc::now(),
            description: notice.description,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct HeartbeatIn {
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Serialize)]
struct HeartbeatOut {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AssignmentAckIn {
    #[serde(default)]
    order_id: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    note: String,
}

#[derive(Serialize)]
struct AssignmentAckOut {
    #[serde(rename = "type")]
    kind: &'static str,
    order_id: i64,
    status: String,
    message: &'static str,
}

async fn heartbeat_socket(
    ws: WebSocketUpgrade,
    Extension(user): Extension<AuthUser>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, drone_id: i64) {
    let (sink, mut stream) = socket.split();
    let client = state.registry.register(drone_id, Box::new(WsChannel { sink })).await;
    state
        .metrics
        .connected_drones
        .set(state.registry.connected() as i64);
    info!(drone_id, "drone heartbeat channel connected");

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(drone_id, error = %err, "heartbeat read failed");
                break;
            }
        };

        match message {
            Message::Text(text) => handle_message(&state, &client, drone_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(drone_id, &client).await;
    state
        .metrics
        .connected_drones
        .set(state.registry.connected() as i64);
    info!(drone_id, "drone heartbeat channel disconnected");
}

async fn handle_message(
    state: &Arc<AppState>,
    client: &Arc<ClientHandle>,
    drone_id: i64,
    text: &str,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            write_error(client, format!("invalid message: {err}")).await;
            return;
        }
    };

    // A message without a type is treated as a heartbeat.
    let kind = if envelope.kind.is_empty() {
        MESSAGE_TYPE_HEARTBEAT.to_string()
    } else {
        envelope.kind.to_lowercase()
    };

    match kind.as_str() {
        MESSAGE_TYPE_HEARTBEAT => process_heartbeat(state, client, drone_id, text).await,
        MESSAGE_TYPE_ASSIGNMENT_ACK => process_assignment_ack(client, drone_id, text).await,
        other => write_error(client, format!("unknown message type: {other}")).await,
    }
}

async fn process_heartbeat(
    state: &Arc<AppState>,
    client: &Arc<ClientHandle>,
    drone_id: i64,
    text: &str,
) {
    let payload: HeartbeatIn = match serde_json::from_str(text) {
        Ok(payload) => payload,
        Err(err) => {
            write_error(client, format!("invalid heartbeat payload: {err}")).await;
            return;
        }
    };

    let (Some(lat), Some(lng)) = (payload.lat, payload.lng) else {
        write_error(client, "lat and lng are required".to_string()).await;
        return;
    };

    let position = match GeoPoint::validated(lat, lng) {
        Ok(position) => position,
        Err(err) => {
            write_error(client, err.to_string()).await;
            return;
        }
    };

    match state.drones.heartbeat(drone_id, position).await {
        Ok(_) => write_ok(client).await,
        Err(err) => write_error(client, err.to_string()).await,
    }
}

/// An ack is informational only; reserving the order remains the committing
/// act.
async fn process_assignment_ack(client: &Arc<ClientHandle>, drone_id: i64, text: &str) {
    let ack: AssignmentAckIn = match serde_json::from_str(text) {
        Ok(ack) => ack,
        Err(err) => {
            write_error(client, format!("invalid assignment ack payload: {err}")).await;
            return;
        }
    };

    if ack.order_id == 0 {
        write_error(client, "order_id is required for assignment ack".to_string()).await;
        return;
    }

    let status = ack.status.to_lowercase();
    if status != "accepted" && status != "declined" {
        write_error(client, "status must be accepted or declined".to_string()).await;
        return;
    }

    info!(
        drone_id,
        order_id = ack.order_id,
        status = %status,
        note = %ack.note,
        "assignment acknowledged"
    );

    let response = AssignmentAckOut {
        kind: MESSAGE_TYPE_ASSIGNMENT_ACK,
        order_id: ack.order_id,
        status,
        message: "acknowledged",
    };
    if let Err(err) = client.send(&response).await {
        warn!(drone_id, error = %err, "assignment ack response write failed");
    }
}

async fn write_ok(client: &Arc<ClientHandle>) {
    let response = HeartbeatOut {
        kind: MESSAGE_TYPE_HEARTBEAT,
        message: "ok",
        timestamp: Utc::now(),
        error: None,
    };
    if let Err(err) = client.send(&response).await {
        warn!(error = %err, "heartbeat response write failed");
    }
}

async fn write_error(client: &Arc<ClientHandle>, detail: String) {
    let response = HeartbeatOut {
        kind: MESSAGE_TYPE_HEARTBEAT,
        message: "error",
        timestamp: Utc::now(),
        error: Some(detail),
    };
    if let Err(err) = client.send(&response).await {
        warn!(error = %err, "heartbeat response write failed");
    }
}
