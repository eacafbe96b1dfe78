//! JSON-RPC 2.0 envelope: `tools/list` and `tools/call`, with results
//! wrapped into the MCP content-array shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use webpipe_core::Error;

use crate::registry::ToolRegistry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Error {
    /// Maps error kinds onto JSON-RPC error codes; unrecognized application
    /// errors fall back to the generic server-error range.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Error::BadInput(_) => -32602,
            Error::UnknownTool(_) => -32601,
            Error::NoActiveSession | Error::NoSession => -32001,
            Error::Timeout => -32002,
            Error::BlockedByChallenge => -32003,
            Error::HttpError(_) => -32004,
            Error::ProviderError(_) => -32005,
            Error::Generic(_) => -32000,
        }
    }
}

/// Wraps a tool's raw JSON result into the spec's content-array envelope:
/// an ordered array of `{type:"text", text:<pretty-printed JSON>}` items.
fn wrap_content(value: &Value) -> Value {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    json!({"content": [{"type": "text", "text": text}]})
}

pub async fn handle_request(registry: &ToolRegistry, state: Arc<AppState>, req: RpcRequest) -> RpcResponse {
    match req.method.as_str() {
        "tools/list" => {
            let tools = registry.list();
            RpcResponse { jsonrpc: "2.0", id: req.id, result: Some(json!({"tools": tools})), error: None }
        }
        "tools/call" => {
            let name = match req.params.get("name").and_then(|v| v.as_str()) {
                Some(n) => n.to_string(),
                None => {
                    return RpcResponse {
                        jsonrpc: "2.0",
                        id: req.id,
                        result: None,
                        error: Some(RpcError { code: -32602, message: "missing params.name".to_string() }),
                    }
                }
            };
            let arguments = req.params.get("arguments").cloned().unwrap_or(Value::Null);
            match registry.call(state, &name, arguments).await {
                Ok(value) => RpcResponse { jsonrpc: "2.0", id: req.id, result: Some(wrap_content(&value)), error: None },
                Err(e) => RpcResponse {
                    jsonrpc: "2.0",
                    id: req.id,
                    result: None,
                    error: Some(RpcError { code: e.rpc_code(), message: e.to_string() }),
                },
            }
        }
        other => RpcResponse {
            jsonrpc: "2.0",
            id: req.id,
            result: None,
            error: Some(RpcError { code: -32601, message: format!("unknown method: {other}") }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::build_registry;

    #[tokio::test]
    async fn tools_list_returns_descriptors() {
        let registry = build_registry();
        let state = Arc::new(AppState::new());
        let req = RpcRequest { jsonrpc: Some("2.0".to_string()), id: json!(1), method: "tools/list".to_string(), params: Value::Null };
        let resp = handle_request(&registry, state, req).await;
        assert!(resp.error.is_none());
        assert!(resp.result.unwrap()["tools"].as_array().unwrap().len() >= 17);
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_json_rpc_error() {
        let registry = build_registry();
        let state = Arc::new(AppState::new());
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: json!(2),
            method: "tools/call".to_string(),
            params: json!({"name": "nope", "arguments": {}}),
        };
        let resp = handle_request(&registry, state, req).await;
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn tools_call_wraps_result_in_content_array() {
        let registry = build_registry();
        let state = Arc::new(AppState::new());
        let req = RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: json!(3),
            method: "tools/call".to_string(),
            params: json!({"name": "list_cart", "arguments": {}}),
        };
        let resp = handle_request(&registry, state, req).await;
        let result = resp.result.unwrap();
        let content = result["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], json!("text"));
        assert!(content[0]["text"].as_str().unwrap().contains("cart"));
    }
}
