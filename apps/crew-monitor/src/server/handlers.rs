// [[AgentOps]]/apps/crew-monitor/src/server/handlers.rs
// Purpose: API Handlers. Run control plus read-only access to the derived pipeline view.
// Architecture: API Layer
// Dependencies: Axum, Runtime

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State, Json},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::events::StreamEvent;
use crate::observability::StreamStats;
use crate::runtime::{CrewRuntime, RuntimeError};
use crate::view::PipelineView;

#[derive(serde::Serialize)]
pub struct HealthResponse {
    status: String,
    message: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Crew monitor is running".to_string(),
    })
}

pub async fn get_view(State(runtime): State<Arc<CrewRuntime>>) -> Json<PipelineView> {
    Json(runtime.view().as_ref().clone())
}

pub async fn get_events(State(runtime): State<Arc<CrewRuntime>>) -> Json<VecDeque<StreamEvent>> {
    Json(runtime.state().events.clone())
}

pub async fn get_stats(State(runtime): State<Arc<CrewRuntime>>) -> Json<StreamStats> {
    Json(runtime.stats())
}

pub async fn start_run(
    State(runtime): State<Arc<CrewRuntime>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match runtime.start_run().await {
        Ok(run_id) => Ok(Json(json!({
            "success": true,
            "run_id": run_id
        }))),
        Err(RuntimeError::AlreadyRunning) => {
            tracing::warn!("Start requested while a crew run is in flight");
            Err(StatusCode::CONFLICT)
        }
        Err(RuntimeError::Backend(e)) => {
            tracing::error!("Failed to start crew: {}", e);
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(e) => {
            tracing::error!("Failed to start crew: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn clear_run(State(runtime): State<Arc<CrewRuntime>>) -> StatusCode {
    match runtime.clear().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            tracing::error!("Failed to clear crew run: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn ws_crew_stream(
    State(runtime): State<Arc<CrewRuntime>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_crew_stream(socket, runtime))
}

fn view_frame(view: &PipelineView) -> Option<String> {
    serde_json::to_string(&json!({
        "type": "view_update",
        "view": view,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
    .ok()
}

fn event_frame(event: &StreamEvent) -> Option<String> {
    serde_json::to_string(&json!({
        "type": "event",
        "event": event,
    }))
    .ok()
}

async fn handle_crew_stream(socket: WebSocket, runtime: Arc<CrewRuntime>) {
    let (mut sender, mut receiver) = socket.split();
    let mut views = runtime.watch_views();
    let mut events = runtime.subscribe_events();

    // Send initial view
    let initial = views.borrow_and_update().clone();
    if let Some(frame) = view_frame(&initial) {
        if sender.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            // Check for client disconnect
            msg = receiver.next() => {
                if matches!(msg, None | Some(Err(_)) | Some(Ok(Message::Close(_)))) {
                    tracing::info!("Client disconnected from crew stream");
                    break;
                }
            }

            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let Some(frame) = view_frame(&view) else { continue };
                if sender.send(Message::Text(frame)).await.is_err() {
                    tracing::info!("Failed to send view update, client disconnected");
                    break;
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    let Some(frame) = event_frame(&event) else { continue };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Crew stream client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let _ = sender.close().await;
}
