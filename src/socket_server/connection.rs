//! WebSocket connection handler
//!
//! Manages one live-update connection: resolves the user from the
//! handshake, registers a listener on the user's watch session, forwards
//! file events and answers file queries. The listener is removed before the
//! connection state is released.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};

use crate::config::FileApiConfig;
use crate::paths::{is_valid_user_id, DEFAULT_USER_ID};
use crate::server::{FileEvent, ListenerId, ListenerInbox, Listener, WatchSession};
use crate::socket_server::files::WorkspaceFiles;
use crate::socket_server::protocol::{
    ClientMessage, ConnectionInfo, DeleteFileParams, ListFilesParams, ReadFileParams,
    ServerMessage, UploadFilesParams, WriteFileParams,
};
use crate::socket_server::registry::WatchRegistry;
use crate::WorkspaceError;

/// Handshake header carrying the user identifier
pub const USER_ID_HEADER: &str = "x-user-id";

/// Keep-alive text frame sent by browser clients
const PING_TEXT: &str = "ping";

/// Pick the user id from a handshake header value.
///
/// Missing or blank means the default user; anything else must be a valid id.
pub fn user_id_from_header(value: Option<&str>) -> Result<String, WorkspaceError> {
    match value.map(str::trim) {
        None | Some("") => Ok(DEFAULT_USER_ID.to_string()),
        Some(id) if is_valid_user_id(id) => Ok(id.to_string()),
        Some(id) => Err(WorkspaceError::InvalidUserId {
            user_id: id.to_string(),
        }),
    }
}

fn reject(status: StatusCode, message: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message));
    *response.status_mut() = status;
    response
}

/// Handle a single WebSocket connection
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<WatchRegistry>,
    file_config: FileApiConfig,
) {
    let addr = stream.peer_addr().ok();
    tracing::info!("[CONN] New connection from {:?}", addr);

    // Accept WebSocket handshake, capturing the user id
    let mut user_id = None;
    let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        let header = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());
        if header.is_none() {
            tracing::warn!("[CONN] No {} header, using default workspace", USER_ID_HEADER);
        }
        match user_id_from_header(header) {
            Ok(id) => {
                user_id = Some(id);
                Ok(resp)
            }
            Err(e) => Err(reject(StatusCode::BAD_REQUEST, e.to_string())),
        }
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("[CONN] WebSocket handshake failed: {}", e);
            return;
        }
    };
    let Some(user_id) = user_id else {
        return;
    };

    let session = match registry.get_or_create(&user_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("[CONN] No watch session for {}: {}", user_id, e);
            let mut ws = ws_stream;
            let msg = ServerMessage::Error {
                id: None,
                code: e.code().to_string(),
                message: e.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = ws.send(Message::Text(json)).await;
            }
            let _ = ws.close(None).await;
            return;
        }
    };

    let mut conn = ConnectionState::new(ws_stream, registry, session, user_id, file_config);
    conn.run().await;

    tracing::info!("[CONN] Connection closed from {:?}", addr);
}

/// State for a single connection
struct ConnectionState {
    ws: WebSocketStream<TcpStream>,
    registry: Arc<WatchRegistry>,
    session: Arc<WatchSession>,
    files: WorkspaceFiles,
    client_id: String,
    user_id: String,
    listener_id: ListenerId,
    inbox: ListenerInbox,
}

impl ConnectionState {
    fn new(
        ws: WebSocketStream<TcpStream>,
        registry: Arc<WatchRegistry>,
        session: Arc<WatchSession>,
        user_id: String,
        file_config: FileApiConfig,
    ) -> Self {
        let client_id = format!("cli_{}", uuid::Uuid::new_v4().simple());
        let (listener, inbox) = Listener::channel(session.config().listener_capacity);
        let listener_id = session.add_listener(listener);
        let files = WorkspaceFiles::new(session.root(), file_config);
        Self {
            ws,
            registry,
            session,
            files,
            client_id,
            user_id,
            listener_id,
            inbox,
        }
    }

    async fn run(&mut self) {
        let info = ConnectionInfo {
            client_id: self.client_id.clone(),
            user_id: self.user_id.clone(),
            root: self.session.root().to_path_buf(),
        };
        if self.send(&ServerMessage::Connected(info)).await.is_err() {
            self.cleanup();
            return;
        }

        loop {
            tokio::select! {
                // Handle incoming WebSocket messages
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                tracing::error!("[CONN] Error handling message: {}", e);
                                let _ = self.send_error(None, "internal_error", &e.to_string()).await;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("[CONN] Client {} requested close", self.client_id);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Err(e)) => {
                            tracing::error!("[CONN] WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                // Forward file events from the watch session
                event = self.inbox.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.send_event(&event).await {
                                tracing::warn!("[CONN] Failed to send event to {}: {}", self.client_id, e);
                                break;
                            }
                        }
                        None => {
                            tracing::info!("[CONN] Event stream for {} ended", self.client_id);
                            break;
                        }
                    }
                }
            }
        }

        // Cleanup on disconnect
        self.cleanup();
    }

    async fn handle_message(&mut self, text: &str) -> anyhow::Result<()> {
        if text == PING_TEXT {
            self.ws.send(Message::Text("pong".to_string())).await?;
            return Ok(());
        }

        let msg: ClientMessage = serde_json::from_str(text)?;
        match msg {
            ClientMessage::Query { id, method, params } => {
                match self.handle_query(&method, params).await {
                    Ok(value) => {
                        self.send(&ServerMessage::Response { id, result: value }).await?;
                    }
                    Err(e) => {
                        let code = match e.downcast_ref::<WorkspaceError>() {
                            Some(err) if err.is_client_error() => {
                                tracing::debug!("[CONN] {} rejected: {}", method, err);
                                err.code()
                            }
                            Some(err) => {
                                tracing::warn!("[CONN] {} failed: {}", method, err);
                                err.code()
                            }
                            None => {
                                tracing::debug!("[CONN] Bad {} query: {}", method, e);
                                "query_error"
                            }
                        };
                        self.send_error(Some(id), code, &e.to_string()).await?;
                    }
                }
            }

            ClientMessage::Ping => {
                self.send(&ServerMessage::Pong).await?;
            }
        }

        Ok(())
    }

    async fn handle_query(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        // `null` params stand for an empty object
        let params = if params.is_null() {
            serde_json::json!({})
        } else {
            params
        };

        match method {
            "list_files" => {
                let p: ListFilesParams = serde_json::from_value(params)?;
                let listing = self.files.list_files(&p.path).await?;
                Ok(serde_json::to_value(listing)?)
            }

            "read_file" => {
                let p: ReadFileParams = serde_json::from_value(params)?;
                let content = self.files.read_file(&p.path, p.raw).await?;
                Ok(serde_json::to_value(content)?)
            }

            "write_file" => {
                let p: WriteFileParams = serde_json::from_value(params)?;
                let path = self.files.write_file(&p.path, &p.content).await?;
                Ok(serde_json::json!({ "path": path }))
            }

            "delete_file" => {
                let p: DeleteFileParams = serde_json::from_value(params)?;
                let path = self.files.delete_file(&p.path).await?;
                Ok(serde_json::json!({ "path": path }))
            }

            "upload_files" => {
                let p: UploadFilesParams = serde_json::from_value(params)?;
                let uploaded = self.files.upload_files(&p.path, &p.files).await?;
                Ok(serde_json::json!({
                    "message": format!("Uploaded {} file(s)", uploaded.len()),
                    "uploaded_files": uploaded,
                }))
            }

            "save_workspace" => {
                let uploaded = self
                    .registry
                    .provisioner()
                    .save_workspace(&self.user_id)
                    .await?;
                Ok(serde_json::json!({
                    "uploaded": uploaded,
                    "user_id": self.user_id,
                }))
            }

            "whoami" => Ok(serde_json::json!({
                "user_id": self.user_id,
                "root": self.session.root(),
            })),

            _ => Err(anyhow::anyhow!("Unknown method: {}", method)),
        }
    }

    async fn send(&mut self, msg: &ServerMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn send_event(&mut self, event: &FileEvent) -> anyhow::Result<()> {
        self.ws.send(Message::Text(event.to_json())).await?;
        Ok(())
    }

    async fn send_error(
        &mut self,
        id: Option<u64>,
        code: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        self.send(&ServerMessage::Error {
            id,
            code: code.to_string(),
            message: message.to_string(),
        })
        .await
    }

    fn cleanup(&mut self) {
        if self.session.remove_listener(self.listener_id) {
            tracing::debug!(
                "[CONN] Removed listener for {} ({} left on {})",
                self.client_id,
                self.session.listener_count(),
                self.user_id
            );
        }
    }
}
