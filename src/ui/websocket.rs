//! Session event stream over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::session::SessionEvent;
use crate::ui::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward session events as JSON text until the client goes away
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.session.subscribe();

    // Current tracks first so the client does not wait for the next change
    if let Ok(views) = state.session.tracks().await {
        let initial = SessionEvent::TracksChanged {
            tracks: views.into_iter().map(|v| v.track).collect(),
        };
        if send_event(&mut sender, &initial).await.is_err() {
            return;
        }
    }

    tracing::debug!("Event socket opened");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event socket lagging");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Event socket closed");
}

async fn send_event<S>(sender: &mut S, event: &SessionEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("Event serialization failed: {}", e);
            Ok(())
        }
    }
}
