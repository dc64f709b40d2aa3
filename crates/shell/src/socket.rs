//! Socket.IO transport for the bridge
//!
//! Clients invoke with `longday:call` and get the reply as the ack. Worker
//! events and manager state are pushed to every connected socket.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use socketioxide::extract::{AckSender, Data, SocketRef, State};
use socketioxide::{SocketIo, TransportType};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use longday_core::worker::{Subscription, WorkerEvent, WorkerId, WorkerManager, WorkerState};
use longday_core::Error;

use crate::bridge::{Bridge, CallReply, CallRequest};

pub const EVENT_CALL: &str = "longday:call";
pub const EVENT_WORKER_MESSAGE: &str = "worker-message";
pub const EVENT_WORKER_EXIT: &str = "worker-exit";
pub const EVENT_WORKERS_STATE: &str = "workers:state";

/// Shared state for Socket.IO handlers
#[derive(Clone)]
pub struct SocketState {
    pub bridge: Bridge,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessagePayload<'a> {
    pub worker_id: WorkerId,
    pub data: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExitPayload {
    pub worker_id: WorkerId,
    pub exit_code: i32,
}

/// Handle new socket connection
pub async fn on_connect(socket: SocketRef, State(state): State<SocketState>) {
    info!("Client connected: {}", socket.id);

    socket.on(
        EVENT_CALL,
        |State(state): State<SocketState>, Data(data): Data<Value>, ack: AckSender| async move {
            let reply = handle_call(&state.bridge, data).await;
            if let Err(e) = ack.send(&reply) {
                warn!("Failed to send call reply: {}", e);
            }
        },
    );

    socket.on_disconnect(|socket: SocketRef| async move {
        info!("Client disconnected: {}", socket.id);
    });

    if let Some(manager) = state.bridge.tasks() {
        let _ = socket.emit(EVENT_WORKERS_STATE, &manager.states());
    }
}

async fn handle_call(bridge: &Bridge, data: Value) -> CallReply {
    let request: CallRequest = match serde_json::from_value(data) {
        Ok(request) => request,
        Err(e) => {
            return CallReply::from_result(Err(Error::InvalidInput(format!(
                "Malformed call: {}",
                e
            ))))
        }
    };

    let result = bridge.invoke(&request.method, request.args).await;
    if let Err(e) = &result {
        debug!("Call {} failed: {}", request.method, e);
    }
    CallReply::from_result(result)
}

/// Push worker events to every socket until the stream closes
pub fn spawn_event_forwarder(
    io: SocketIo,
    mut events: broadcast::Receiver<WorkerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => emit_worker_event(&io, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagged, skipped {} worker events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Worker event forwarder stopped");
    })
}

fn emit_worker_event(io: &SocketIo, event: &WorkerEvent) {
    let result = match event {
        WorkerEvent::Message { worker_id, data } => io.emit(
            EVENT_WORKER_MESSAGE,
            &WorkerMessagePayload {
                worker_id: *worker_id,
                data,
            },
        ),
        WorkerEvent::Exit {
            worker_id,
            exit_code,
        } => io.emit(
            EVENT_WORKER_EXIT,
            &WorkerExitPayload {
                worker_id: *worker_id,
                exit_code: *exit_code,
            },
        ),
    };

    if let Err(e) = result {
        debug!("Failed to emit worker event: {}", e);
    }
}

/// Push the manager's state to every socket after each change
pub fn forward_manager_state(io: SocketIo, manager: &Arc<WorkerManager>) -> Subscription {
    manager.subscribe(move |snapshot| {
        let mut states: Vec<&WorkerState> = snapshot.values().collect();
        states.sort_by_key(|s| s.sequence);
        if let Err(e) = io.emit(EVENT_WORKERS_STATE, &states) {
            debug!("Failed to emit worker state: {}", e);
        }
    })
}

/// Create and configure Socket.IO layer
pub fn create_socket_layer(state: SocketState) -> (socketioxide::layer::SocketIoLayer, SocketIo) {
    let (layer, io) = SocketIo::builder()
        .with_state(state)
        // Only allow WebSocket transport to avoid CORS issues with polling
        .transports([TransportType::Websocket])
        .build_layer();

    io.ns("/", on_connect);

    (layer, io)
}
