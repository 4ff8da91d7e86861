//! WebSocket endpoints.

use agora_core::{JobId, JobPhase};
use agora_state::{PhaseChangeEvent, PhaseFilter};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;

use crate::state::AppState;

/// WebSocket message for job updates.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStreamMessage {
    /// Current phase when the stream opens.
    Snapshot {
        job_id: JobId,
        phase: JobPhase,
        phase_name: String,
    },
    /// A phase transition.
    PhaseChange(PhaseChangeEvent),
    /// Error message.
    Error { message: String },
}

impl JobStreamMessage {
    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json)),
            Err(e) => {
                tracing::error!("failed to encode stream message: {}", e);
                None
            }
        }
    }
}

/// Phase-change stream for one job.
pub async fn job_stream(
    ws: WebSocketUpgrade,
    Path(id): Path<JobId>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_job_stream(socket, id, state))
}

async fn send(socket: &mut WebSocket, msg: JobStreamMessage) -> bool {
    match msg.to_message() {
        Some(frame) => socket.send(frame).await.is_ok(),
        None => false,
    }
}

async fn handle_job_stream(mut socket: WebSocket, job_id: JobId, state: AppState) {
    let watch = state.orchestrator.watch().clone();
    // Subscribe before the snapshot so no transition falls between them.
    let subscription = watch.subscribe(PhaseFilter::job(job_id)).await;
    let subscription_id = subscription.id;
    let mut events = Box::pin(subscription.into_stream());

    match state.orchestrator.get_job(job_id).await {
        Some(job) => {
            let phase = job.phase();
            let snapshot = JobStreamMessage::Snapshot {
                job_id,
                phase,
                phase_name: phase.to_string(),
            };
            if !send(&mut socket, snapshot).await || phase.is_terminal() {
                watch.unsubscribe(subscription_id).await;
                return;
            }
        }
        None => {
            let msg = JobStreamMessage::Error {
                message: format!("Job {} not found", job_id),
            };
            let _ = send(&mut socket, msg).await;
            watch.unsubscribe(subscription_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let terminal = event.to.is_terminal();
                if !send(&mut socket, JobStreamMessage::PhaseChange(event)).await {
                    break;
                }
                // Close if terminal
                if terminal {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    watch.unsubscribe(subscription_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_stream_message_shape() {
        let msg = JobStreamMessage::PhaseChange(PhaseChangeEvent {
            job_id: 4,
            from: JobPhase::Evaluation,
            to: JobPhase::Completed,
            memo_id: Some(9),
            timestamp: Utc::now(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "phase_change");
        assert_eq!(value["job_id"], 4);
        assert_eq!(value["to"], 4);

        let snapshot = JobStreamMessage::Snapshot {
            job_id: 4,
            phase: JobPhase::Request,
            phase_name: "REQUEST".to_string(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["phase"], 0);
    }
}
