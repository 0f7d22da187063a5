//! JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The message is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;
/// The turn could not be persisted; the request did not succeed.
pub const PERSISTENCE_ERROR: i32 = -32001;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier; null when the request id could not be read.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Parameters of `assistant/handle`.
#[derive(Debug, Deserialize)]
pub struct HandleParams {
    pub conversation_id: String,
    pub message: String,
}

/// Server identification returned by `initialize`.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Result of the `initialize` handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Handler names the router dispatches to.
    pub handlers: Vec<String>,
    #[serde(rename = "defaultHandler")]
    pub default_handler: String,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Error response for a request that could not be read or validated.
    pub fn from_protocol_error(id: Option<Value>, err: &ProtocolError) -> Self {
        let code = match err {
            ProtocolError::Parse(_) => PARSE_ERROR,
            ProtocolError::InvalidRequest { .. } => INVALID_REQUEST,
            ProtocolError::InvalidParameters { .. } => INVALID_PARAMS,
        };
        Self::error(id, code, err.to_string())
    }
}

impl JsonRpcRequest {
    /// Parse one line into a request, checking the protocol version.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let request: Self = serde_json::from_str(line)?;
        if request.jsonrpc != "2.0" {
            return Err(ProtocolError::InvalidRequest {
                message: format!("unsupported jsonrpc version '{}'", request.jsonrpc),
            });
        }
        Ok(request)
    }
}
