//! The eight named tools `tools/call` dispatches to (SPEC_FULL.md §4.6).
//! Each returns the tool's JSON object directly; [`crate::protocol`] wraps
//! it in the MCP content envelope.

use coord_broker::BrokerClient;
use coord_core::types::{MessageEnvelope, MessageQuery, MessageType};
use serde_json::{Value, json};

pub const TOOL_NAMES: &[&str] = &[
    "coord_publish_message",
    "coord_check_messages",
    "coord_ack_message",
    "coord_get_presence",
    "coord_get_notifications",
    "coord_register_presence",
    "coord_deregister_presence",
    "coord_heartbeat",
];

/// Schema block returned by `tools/list`. Intentionally terse — the wire
/// contract lives in SPEC_FULL.md §4.6, not in a JSON Schema document this
/// crate would need to keep in lockstep.
pub fn list_tools() -> Value {
    let tools: Vec<Value> = TOOL_NAMES
        .iter()
        .map(|name| json!({"name": name, "description": tool_description(name)}))
        .collect();
    json!({ "tools": tools })
}

fn tool_description(name: &str) -> &'static str {
    match name {
        "coord_publish_message" => "Publish a typed coordination message to another instance or to all.",
        "coord_check_messages" => "Query coordination messages by filter.",
        "coord_ack_message" => "Acknowledge receipt of a message that requires one.",
        "coord_get_presence" => "List known instances and their liveness.",
        "coord_get_notifications" => "Drain this instance's queued offline notifications.",
        "coord_register_presence" => "Register this instance as active.",
        "coord_deregister_presence" => "Mark this instance as inactive.",
        "coord_heartbeat" => "Refresh this instance's last-heartbeat timestamp.",
        _ => "",
    }
}

fn str_field(args: &Value, name: &str) -> Option<String> {
    args.get(name).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(args: &Value, name: &str, default: bool) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(default)
}

pub async fn call_tool(broker: &BrokerClient, name: &str, args: &Value) -> Value {
    match name {
        "coord_publish_message" => publish_message(broker, args).await,
        "coord_check_messages" => check_messages(broker, args).await,
        "coord_ack_message" => ack_message(broker, args).await,
        "coord_get_presence" => get_presence(broker).await,
        "coord_get_notifications" => get_notifications(broker, args).await,
        "coord_register_presence" => register_presence(broker, args).await,
        "coord_deregister_presence" => deregister_presence(broker, args).await,
        "coord_heartbeat" => heartbeat(broker, args).await,
        _ => json!({"success": false, "error": format!("unknown tool: {name}")}),
    }
}

async fn publish_message(broker: &BrokerClient, args: &Value) -> Value {
    let identity = broker.identity();
    if identity.is_empty() || identity == "unknown" {
        return json!({
            "success": false,
            "error": "sender identity is invalid",
            "hint": "set CLAUDE_INSTANCE_ID before starting the tool host",
        });
    }

    let Some(msg_type_raw) = str_field(args, "msg_type") else {
        return json!({"success": false, "error": "msg_type is required"});
    };
    let msg_type = match MessageType::parse(&msg_type_raw) {
        Ok(t) => t,
        Err(err) => {
            return json!({
                "success": false,
                "error": err.to_string(),
                "valid_types": MessageType::valid_tags(),
            });
        }
    };
    let Some(subject) = str_field(args, "subject") else {
        return json!({"success": false, "error": "subject is required"});
    };
    let Some(description) = str_field(args, "description") else {
        return json!({"success": false, "error": "description is required"});
    };
    let to_instance = str_field(args, "to_instance").unwrap_or_else(|| "orchestrator".to_string());
    let requires_ack = bool_field(args, "requires_ack", true);

    match broker
        .publish(msg_type, &subject, &description, identity, &to_instance, requires_ack)
        .await
    {
        Ok(envelope) => json!({
            "success": true,
            "message_id": envelope.id,
            "type": envelope.msg_type.as_str(),
            "from": envelope.from_instance,
            "to": envelope.to_instance,
            "timestamp": coord_core::types::timestamp_seconds::to_wire(envelope.timestamp),
            "requires_ack": envelope.requires_ack,
        }),
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn check_messages(broker: &BrokerClient, args: &Value) -> Value {
    let mut filter = MessageQuery::default();
    filter.to_instance = str_field(args, "to_instance");
    filter.from_instance = str_field(args, "from_instance");
    if let Some(raw) = str_field(args, "msg_type") {
        match MessageType::parse(&raw) {
            Ok(t) => filter.msg_type = Some(t),
            Err(err) => {
                return json!({
                    "success": false,
                    "error": err.to_string(),
                    "valid_types": MessageType::valid_tags(),
                });
            }
        }
    }
    filter.pending_only = bool_field(args, "pending_only", false);
    if let Some(raw) = str_field(args, "since") {
        match coord_core::types::timestamp_seconds::parse(&raw) {
            Ok(ts) => filter.since = Some(ts),
            Err(err) => return json!({"success": false, "error": err.to_string()}),
        }
    }
    if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
        filter.limit = limit as u32;
    }

    match broker.query(&filter).await {
        Ok(messages) => {
            let serialized: Vec<Value> = messages.iter().map(envelope_to_json).collect();
            json!({"success": true, "count": serialized.len(), "messages": serialized})
        }
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn ack_message(broker: &BrokerClient, args: &Value) -> Value {
    let Some(message_id) = str_field(args, "message_id") else {
        return json!({"success": false, "error": "message_id is required"});
    };
    let comment = str_field(args, "comment");
    match broker.acknowledge(&message_id, broker.identity(), comment.as_deref()).await {
        Ok(true) => json!({"success": true, "message_id": message_id, "acknowledged": true}),
        Ok(false) => json!({"success": false, "error": format!("Message not found: {message_id}")}),
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn get_presence(broker: &BrokerClient) -> Value {
    match broker.get_presence(broker.config().presence_staleness()).await {
        Ok(records) => {
            let presence: serde_json::Map<String, Value> = records
                .into_iter()
                .map(|(instance, record)| (instance, presence_to_json(&record)))
                .collect();
            json!({"success": true, "presence": Value::Object(presence)})
        }
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn get_notifications(broker: &BrokerClient, args: &Value) -> Value {
    let requested = args.get("limit").and_then(Value::as_u64).map(|v| v as u32);
    let cap = broker.config().notifications_cap(requested);
    match broker.pop_notifications(broker.identity(), cap).await {
        Ok(events) => {
            let serialized: Vec<Value> = events.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
            json!({"success": true, "count": serialized.len(), "notifications": serialized})
        }
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn register_presence(broker: &BrokerClient, args: &Value) -> Value {
    let Some(role) = str_field(args, "role") else {
        return json!({"success": false, "error": "role is required"});
    };
    let worktree_path = str_field(args, "worktree_path");
    let session_id = str_field(args, "session_id");
    match broker.register(&role, session_id.as_deref()).await {
        Ok(()) => {
            let mut result = json!({
                "success": true,
                "role": role,
                "registered_at": coord_core::types::timestamp_seconds::to_wire(coord_core::types::now_seconds()),
            });
            if let Some(worktree_path) = worktree_path {
                result["worktree_path"] = json!(worktree_path);
            }
            if let Some(session_id) = session_id {
                result["session_id"] = json!(session_id);
            }
            result
        }
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn deregister_presence(broker: &BrokerClient, args: &Value) -> Value {
    let Some(role) = str_field(args, "role") else {
        return json!({"success": false, "error": "role is required"});
    };
    match broker.unregister(&role).await {
        Ok(()) => json!({"success": true, "role": role}),
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

async fn heartbeat(broker: &BrokerClient, args: &Value) -> Value {
    let Some(role) = str_field(args, "role") else {
        return json!({"success": false, "error": "role is required"});
    };
    match broker.heartbeat(&role).await {
        Ok(()) => json!({"success": true, "role": role}),
        Err(err) => json!({"success": false, "error": err.to_string()}),
    }
}

fn envelope_to_json(envelope: &MessageEnvelope) -> Value {
    serde_json::to_value(envelope).unwrap_or(Value::Null)
}

fn presence_to_json(record: &coord_core::types::PresenceRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}
