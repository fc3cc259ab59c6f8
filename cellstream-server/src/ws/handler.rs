//! WebSocket upgrade handler and frame loop.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use cellstream_core::protocol::{ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::ServerConnection;
use crate::routes::AppState;
use crate::session::ChannelSink;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let capacity = state.session.queue_capacity;
    let (sink, mut callbacks) = ChannelSink::channel(capacity);
    let mut connection = ServerConnection::new(Arc::clone(&state.server), Arc::new(sink));
    let (responses, mut pending) = mpsc::channel::<ServerFrame>(capacity);
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!("WebSocket connection opened");

    // Forwards responses and callbacks. Ends when the callback channel is
    // revoked, which tears the socket down.
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = pending.recv() => frame,
                callback = callbacks.recv() => match callback {
                    Some(callback) => ServerFrame::callback(callback),
                    None => {
                        debug!("Callback channel closed");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
            };
            match encode_frame(&frame) {
                Ok(message) => {
                    if ws_sender.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize frame"),
            }
        }
    });

    loop {
        let message = tokio::select! {
            message = ws_receiver.next() => message,
            _ = &mut send_task => break,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Ignoring non UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                info!("WebSocket close requested");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Request { id, call }) => {
                let outcome = connection.dispatch(call).await;
                if responses
                    .send(ServerFrame::Response { id, outcome })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Failed to parse client frame"),
        }
    }

    connection.close();
    send_task.abort();
    info!("WebSocket connection closed");
}

/// Serializes a server frame as a text message.
fn encode_frame(frame: &ServerFrame) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstream_core::protocol::{Callback, RemoteFault};
    use cellstream_core::types::ServiceStatus;

    #[test]
    fn test_encode_frame_is_text() {
        let frame = ServerFrame::Response {
            id: 3,
            outcome: Err(RemoteFault::NotRegistered),
        };
        let message = encode_frame(&frame).unwrap();
        let Message::Text(text) = message else {
            panic!("expected text frame");
        };
        let parsed: ServerFrame = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_encode_callback() {
        let frame = ServerFrame::callback(Callback::ServiceStatus {
            status: ServiceStatus::Ready,
        });
        let Message::Text(text) = encode_frame(&frame).unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.as_str().contains("\"type\":\"callback\""));
    }
}
