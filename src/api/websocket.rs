// SPDX-License-Identifier: GPL-3.0-only
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::api::handlers::{ApiError, ApiHandlers, ErrorBody};

/// Commands a console client may send
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Catalog,
    FetchCatalog,
    NewCatalog,
    Promote,
    Push,
}

#[derive(Debug, Serialize)]
struct WsResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<ErrorBody>,
}

impl WsResponse {
    fn from_result<T: Serialize>(result: Result<T, ApiError>) -> Self {
        match result.map(serde_json::to_value) {
            Ok(Ok(value)) => Self {
                kind: "response",
                success: true,
                data: Some(value),
                error: None,
            },
            Ok(Err(e)) => Self::failure("internal_error", e.to_string()),
            Err(e) => Self::failure(e.code, e.message),
        }
    }

    fn failure(code: &str, message: String) -> Self {
        Self {
            kind: "response",
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
            }),
        }
    }
}

/// Console stream: every bus event is forwarded to the client, and clients
/// may issue catalog commands over the same socket
pub struct WebSocketServer {
    handlers: Arc<ApiHandlers>,
}

impl WebSocketServer {
    pub fn new(handlers: Arc<ApiHandlers>) -> Self {
        Self { handlers }
    }

    pub fn router(&self) -> Router {
        let handlers = self.handlers.clone();
        Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                ws.on_upgrade(move |socket| handle_socket(socket, handlers))
            }),
        )
    }
}

async fn handle_socket(socket: WebSocket, handlers: Arc<ApiHandlers>) {
    let (sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    info!("Console client connected");

    let mut send_task = tokio::spawn(async move {
        let mut sender = sender;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    let mut events = handlers.service().events().subscribe();
    let event_tx = tx.clone();
    let mut event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "Failed to serialize console event");
                            continue;
                        }
                    };
                    if event_tx.send(Message::Text(text)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Console client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_message(text, &handlers, &tx).await {
                        error!(error = %e, "Failed to handle WebSocket message");
                    }
                }
                Message::Close(_) => {
                    info!("WebSocket connection closed");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
            event_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
            event_task.abort();
        }
        _ = (&mut event_task) => {
            send_task.abort();
            recv_task.abort();
        }
    };
}

async fn handle_message(
    text: String,
    handlers: &ApiHandlers,
    tx: &mpsc::UnboundedSender<Message>,
) -> anyhow::Result<()> {
    let msg: WsMessage = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            let response = WsResponse::failure("bad_request", format!("Invalid message format: {}", e));
            tx.send(Message::Text(serde_json::to_string(&response)?))?;
            return Ok(());
        }
    };

    let service = handlers.service();
    let response = match msg {
        WsMessage::Catalog => WsResponse::from_result(Ok::<_, ApiError>(service.view().await)),
        WsMessage::FetchCatalog => {
            WsResponse::from_result(service.fetch_catalog().await.map_err(ApiError::from))
        }
        WsMessage::NewCatalog => {
            WsResponse::from_result(Ok::<_, ApiError>(service.new_catalog().await))
        }
        WsMessage::Promote => WsResponse::from_result(service.promote().await.map_err(ApiError::from)),
        WsMessage::Push => WsResponse::from_result(service.push().await.map_err(ApiError::from)),
    };

    tx.send(Message::Text(serde_json::to_string(&response)?))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"fetch_catalog"}"#).unwrap();
        assert!(matches!(msg, WsMessage::FetchCatalog));
        assert!(serde_json::from_str::<WsMessage>(r#"{"type":"install_map"}"#).is_err());
    }

    #[test]
    fn test_failure_response_shape() {
        let response = WsResponse::from_result::<()>(Err(ApiError::bad_request("nope".into())));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "bad_request");
    }
}
