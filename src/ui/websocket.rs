//! Audio WebSocket endpoint: one inbound session per connection

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use std::sync::Arc;

use crate::network::split_socket;
use crate::session::StreamSession;
use crate::ui::server::AppState;

pub async fn audio_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let max_size = state.config.network.max_packet_size;
    ws.max_message_size(max_size)
        .on_upgrade(move |socket| handle_audio_socket(socket, state))
}

async fn handle_audio_socket(socket: WebSocket, state: Arc<AppState>) {
    let transport = split_socket(socket);
    let mut session = StreamSession::inbound(state.config.clone(), transport);
    if let Some(tx) = &state.consumer {
        session = session.with_consumer(tx.clone());
    }
    let session = Arc::new(session);

    if let Err(e) = session.start() {
        tracing::error!("Cannot start session {}: {}", session.id(), e);
        return;
    }
    state.registry.register(Arc::clone(&session));
    tracing::info!("Audio client attached to session {}", session.id());

    let outcome = session.wait().await;
    state.registry.complete(session.id(), &outcome);
    match outcome {
        Ok(()) => tracing::info!("Session {} finished", session.id()),
        Err(e) => tracing::warn!("Session {} ended: {}", session.id(), e),
    }
}
