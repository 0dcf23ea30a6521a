//! Live job monitor over WebSocket.
//!
//! Every connected client receives the [`MonitorEvent`]s published after each
//! persisted job transition, serialized as JSON text frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use archivist_core::MonitorEvent;

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn monitor_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn encode(event: &MonitorEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(job_id = event.job_id(), "Failed to serialize MonitorEvent: {}", e);
            None
        }
    }
}

/// Handle a single monitor connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before anything else so no transition is missed
    let mut rx = state.monitor().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("Monitor client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    WS_MESSAGES_SENT.with_label_values(&[event.kind()]).inc();
                    let Some(message) = encode(&event) else {
                        continue;
                    };
                    if sender.send(message).await.is_err() {
                        debug!("Monitor send failed, client disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed events are skipped, the client resumes from the next one
                    warn!("Monitor client lagged, skipped {} events", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Monitor channel closed");
                    break;
                }
            }
        }
    });

    // Client frames are only read to notice disconnects
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("Monitor client requested close");
                break;
            }
            Ok(Message::Ping(data)) => {
                debug!("Received ping: {:?}", data);
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Monitor receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("Monitor client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_core::{Job, JobStatus};
    use archivist_core::job::WorkflowHandle;
    use chrono::Utc;

    #[test]
    fn test_encode_produces_tagged_json() {
        let job = Job {
            id: 7,
            name: "item.zip".to_string(),
            origin_id: None,
            workflow: WorkflowHandle::default(),
            pipeline_name: "am".to_string(),
            pipeline_id: None,
            transfer_id: None,
            aip_id: None,
            status: JobStatus::Queued,
            decision_token: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let event = MonitorEvent::JobUpdated {
            id: 7,
            job: Box::new(job),
        };

        let Some(Message::Text(text)) = encode(&event) else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "job_updated");
        assert_eq!(value["id"], 7);
        assert_eq!(value["job"]["status"], "queued");
    }
}
