//! WebSocket push channel for run progress.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tierflow_core::progress::ProgressUpdate;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Interval between heartbeats on an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A tier of a run was recorded.
    Progress(ProgressUpdate),
    /// Server heartbeat (sent periodically to keep connection alive).
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    fn kind(&self) -> &'static str {
        match self {
            WsMessage::Progress(_) => "progress",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward updates of this run.
    pub run_id: Option<String>,
}

impl WsParams {
    fn accepts(&self, update: &ProgressUpdate) -> bool {
        self.run_id
            .as_deref()
            .is_none_or(|run_id| run_id == update.run_id)
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.progress().subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, params))
}

/// Handle a single WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    mut rx: broadcast::Receiver<ProgressUpdate>,
    params: WsParams,
) {
    let (mut sender, mut receiver) = socket.split();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!(run_id = ?params.run_id, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                result = rx.recv() => match result {
                    Ok(update) if params.accepts(&update) => WsMessage::Progress(update),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} messages", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Progress channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: chrono::Utc::now().timestamp(),
                },
            };

            WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize WsMessage: {}", e);
                }
            }
        }
    });

    // Drain client messages until it goes away
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(run_id: &str) -> ProgressUpdate {
        ProgressUpdate {
            run_id: run_id.to_string(),
            tier_id: "tier1".to_string(),
            fraction_complete: 0.5,
            tiers_completed: 1,
            total_tiers: Some(2),
        }
    }

    #[test]
    fn test_params_filter_by_run() {
        let params = WsParams {
            run_id: Some("run-1".to_string()),
        };
        assert!(params.accepts(&update("run-1")));
        assert!(!params.accepts(&update("run-2")));
        assert!(WsParams::default().accepts(&update("run-2")));
    }

    #[test]
    fn test_progress_message_shape() {
        let json = serde_json::to_value(WsMessage::Progress(update("run-1"))).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["fraction_complete"], 0.5);

        let json = serde_json::to_value(WsMessage::Heartbeat { timestamp: 7 }).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["timestamp"], 7);
    }
}
