//! # coord-host
//!
//! JSON-RPC 2.0 line-delimited stdio server translating named tool calls
//! into [`coord_broker::BrokerClient`] operations (SPEC_FULL.md §4.6).
//!
//! [`handle_request`] is the pure dispatch core, kept separate from the
//! stdin/stdout loop in `main.rs` so it can be exercised directly in tests
//! without going through a pipe.

pub mod protocol;
pub mod tools;

use coord_broker::BrokerClient;
use protocol::{INTERNAL_ERROR, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};
use serde_json::{Value, json};

/// Dispatch one parsed request. Returns `None` for notifications, which
/// per the JSON-RPC 2.0 spec never receive a response.
pub async fn handle_request(broker: &BrokerClient, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let is_notification = req.id.is_none();
    let id = req.id.clone().unwrap_or(Value::Null);

    let result = match req.method.as_str() {
        "initialize" => Ok(protocol::initialize_result()),
        "tools/list" => Ok(tools::list_tools()),
        "tools/call" => Ok(dispatch_tool_call(broker, req.params.as_ref()).await),
        "notifications/initialized" => {
            return None;
        }
        _ => Err((METHOD_NOT_FOUND, format!("method not found: {}", req.method))),
    };

    if is_notification {
        return None;
    }

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err((code, message)) => JsonRpcResponse::failure(id, code, message),
    })
}

async fn dispatch_tool_call(broker: &BrokerClient, params: Option<&Value>) -> Value {
    let Some(params) = params else {
        return protocol::wrap_tool_content(&json!({"success": false, "error": "missing params"}));
    };
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return protocol::wrap_tool_content(&json!({"success": false, "error": "missing tool name"}));
    };
    let empty = json!({});
    let arguments = params.get("arguments").unwrap_or(&empty);

    if !tools::TOOL_NAMES.contains(&name) {
        return protocol::wrap_tool_content(&json!({"success": false, "error": format!("unknown tool: {name}")}));
    }

    let result = tools::call_tool(broker, name, arguments).await;
    protocol::wrap_tool_content(&result)
}

/// Parse one input line, returning a JSON-RPC error response for malformed
/// JSON rather than propagating — the main loop logs and continues
/// (SPEC_FULL.md §4.6 "Main loop").
pub fn parse_request(line: &str) -> Result<JsonRpcRequest, serde_json::Error> {
    serde_json::from_str(line)
}

/// Convenience used by callers that only need the internal-error shape for
/// an unparsed line (no request id is available yet).
pub fn malformed_request_response(err: &serde_json::Error) -> JsonRpcResponse {
    JsonRpcResponse::failure(Value::Null, INTERNAL_ERROR, format!("malformed request: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coord_core::Config;
    use coord_core::kv::MemoryStore;
    use std::sync::Arc;

    fn broker() -> BrokerClient {
        BrokerClient::new(Arc::new(MemoryStore::default()), Config::default(), "backend")
    }

    #[tokio::test]
    async fn initialize_returns_capability_block() {
        let broker = broker();
        let req = parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).unwrap();
        let resp = handle_request(&broker, req).await.unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "coord-host");
    }

    #[tokio::test]
    async fn tools_list_names_all_eight_tools() {
        let broker = broker();
        let req = parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        let resp = handle_request(&broker, req).await.unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 8);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let broker = broker();
        let req = parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"bogus"}"#).unwrap();
        let resp = handle_request(&broker, req).await.unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_gets_no_response() {
        let broker = broker();
        let req = parse_request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(handle_request(&broker, req).await.is_none());
    }

    #[tokio::test]
    async fn tools_call_publish_roundtrips_through_content_envelope() {
        let broker = broker();
        let req = parse_request(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"coord_publish_message","arguments":{"msg_type":"GENERAL","subject":"s","description":"d","to_instance":"frontend"}}}"#,
        )
        .unwrap();
        let resp = handle_request(&broker, req).await.unwrap();
        let content = &resp.result.unwrap()["content"][0]["text"];
        let inner: Value = serde_json::from_str(content.as_str().unwrap()).unwrap();
        assert_eq!(inner["success"], true);
        assert_eq!(inner["from"], "backend");
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_reported_in_tool_result_not_rpc_error() {
        let broker = broker();
        let req = parse_request(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
        )
        .unwrap();
        let resp = handle_request(&broker, req).await.unwrap();
        assert!(resp.error.is_none());
        let content = &resp.result.unwrap()["content"][0]["text"];
        let inner: Value = serde_json::from_str(content.as_str().unwrap()).unwrap();
        assert_eq!(inner["success"], false);
    }

    #[test]
    fn malformed_json_line_produces_internal_error_response() {
        let err = parse_request("not json").unwrap_err();
        let resp = malformed_request_response(&err);
        assert_eq!(resp.error.unwrap().code, INTERNAL_ERROR);
    }
}
