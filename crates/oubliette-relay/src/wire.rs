//! Newline-delimited JSON-RPC 2.0 framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use oubliette_core::Fault;

use crate::errors::RelayError;

/// A JSON-RPC request line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol marker; always `"2.0"`.
    pub jsonrpc: String,
    /// Request ID; echoed on the response. Notifications omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request.
    #[must_use]
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id: Some(id.into()),
            method: method.to_owned(),
            params: Some(params),
        }
    }
}

/// A JSON-RPC error body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code.
    pub code: i64,
    /// Short human-readable message.
    pub message: String,
}

/// A JSON-RPC response line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Protocol marker; always `"2.0"`.
    pub jsonrpc: String,
    /// The request ID this responds to.
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    /// A success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failure response from a relay error. Internal detail stays out of
    /// the message; the code carries the classification.
    #[must_use]
    pub fn failure(id: Value, error: &RelayError) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: error.kind().jsonrpc_code(),
                message: error.to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
