//! Newline-delimited JSON-RPC 2.0 over stdio.
//!
//! Methods:
//! - `initialize`: server info and handler names
//! - `ping`
//! - `assistant/handle` `{conversation_id, message}`: route one utterance
//! - `tools/list`: every registered tool descriptor
//!
//! Requests without an id are notifications and get no response.

mod rpc;

pub use rpc::*;

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::error::{AppError, ProtocolError};
use crate::router::Router;

/// Assistant server over stdio.
pub struct AssistantServer {
    router: Arc<Router>,
}

impl AssistantServer {
    /// Create a server around a router
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("ERP assistant server starting...");
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer).await
    }

    /// Serve one request per line from `reader`, writing one response per
    /// line to `writer`.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match JsonRpcRequest::parse(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::from_protocol_error(None, &e))
                }
            };

            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Received notification");
                None
            }
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "assistant/handle" => {
                let response = self.handle_utterance(request.id, request.params).await;
                (!is_notification).then_some(response)
            }
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        METHOD_NOT_FOUND,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            handlers: self.router.handler_names(),
            default_handler: self.router.default_handler().to_string(),
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools = self.router.registry().list_all();
        match serde_json::to_value(&tools) {
            Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
        }
    }

    async fn handle_utterance(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params = match parse_handle_params(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::from_protocol_error(id, &e),
        };

        match self
            .router
            .handle(&params.conversation_id, &params.message)
            .await
        {
            Ok(response) => match serde_json::to_value(response) {
                Ok(val) => JsonRpcResponse::success(id, val),
                Err(e) => {
                    JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e))
                }
            },
            Err(AppError::Persistence(e)) => {
                error!(error = %e, "Request could not be recorded");
                JsonRpcResponse::error(
                    id,
                    PERSISTENCE_ERROR,
                    "The conversation could not be saved; the request was not completed",
                )
            }
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
        }
    }
}

fn parse_handle_params(params: Option<Value>) -> Result<HandleParams, ProtocolError> {
    let invalid = |message: String| ProtocolError::InvalidParameters {
        method: "assistant/handle".to_string(),
        message,
    };

    let params: HandleParams = match params {
        Some(value) => serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
        None => return Err(invalid("missing params".to_string())),
    };

    if params.conversation_id.trim().is_empty() {
        return Err(invalid("conversation_id must not be empty".to_string()));
    }
    Ok(params)
}
