use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// Closed set of coordination message tags. Unknown tags are rejected at the
/// boundary rather than passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ReadyForReview,
    ReviewComplete,
    ReviewFailed,
    ContractChangeProposed,
    ContractReviewNeeded,
    ContractFeedback,
    ContractApproved,
    ContractRejected,
    MetaChangeRequest,
    MetaChangeComplete,
    InterfaceUpdate,
    BlockingIssue,
    General,
    StatusUpdate,
    Heartbeat,
    Notification,
}

impl MessageType {
    pub const ALL: &'static [MessageType] = &[
        MessageType::ReadyForReview,
        MessageType::ReviewComplete,
        MessageType::ReviewFailed,
        MessageType::ContractChangeProposed,
        MessageType::ContractReviewNeeded,
        MessageType::ContractFeedback,
        MessageType::ContractApproved,
        MessageType::ContractRejected,
        MessageType::MetaChangeRequest,
        MessageType::MetaChangeComplete,
        MessageType::InterfaceUpdate,
        MessageType::BlockingIssue,
        MessageType::General,
        MessageType::StatusUpdate,
        MessageType::Heartbeat,
        MessageType::Notification,
    ];

    /// Parse the wire tag (e.g. `"READY_FOR_REVIEW"`), rejecting anything
    /// outside the closed set with the offending string preserved for the
    /// caller's error message.
    pub fn parse(tag: &str) -> Result<Self, MessageError> {
        // Round-trip through serde so the mapping stays the single source of truth.
        serde_json::from_value(serde_json::Value::String(tag.to_string()))
            .map_err(|_| MessageError::InvalidType(tag.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ReadyForReview => "READY_FOR_REVIEW",
            MessageType::ReviewComplete => "REVIEW_COMPLETE",
            MessageType::ReviewFailed => "REVIEW_FAILED",
            MessageType::ContractChangeProposed => "CONTRACT_CHANGE_PROPOSED",
            MessageType::ContractReviewNeeded => "CONTRACT_REVIEW_NEEDED",
            MessageType::ContractFeedback => "CONTRACT_FEEDBACK",
            MessageType::ContractApproved => "CONTRACT_APPROVED",
            MessageType::ContractRejected => "CONTRACT_REJECTED",
            MessageType::MetaChangeRequest => "META_CHANGE_REQUEST",
            MessageType::MetaChangeComplete => "META_CHANGE_COMPLETE",
            MessageType::InterfaceUpdate => "INTERFACE_UPDATE",
            MessageType::BlockingIssue => "BLOCKING_ISSUE",
            MessageType::General => "GENERAL",
            MessageType::StatusUpdate => "STATUS_UPDATE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Notification => "NOTIFICATION",
        }
    }

    pub fn valid_tags() -> Vec<&'static str> {
        Self::ALL.iter().map(MessageType::as_str).collect()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sentinel target identity meaning "every known instance".
pub const BROADCAST_TARGET: &str = "all";

/// Short subject/description pair carried by every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub subject: String,
    pub description: String,
}

/// A fully persisted coordination message.
///
/// `from`/`to` are the wire names; `from_instance`/`to_instance` would be
/// more consistent with the rest of this crate's naming but the wire
/// contract in SPEC_FULL.md §6 is exact, so the serde rename lives here
/// rather than in a separate DTO layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(rename = "from")]
    pub from_instance: String,
    #[serde(rename = "to")]
    pub to_instance: String,
    #[serde(with = "timestamp_seconds")]
    pub timestamp: DateTime<Utc>,
    pub requires_ack: bool,
    pub acknowledged: bool,
    pub payload: MessagePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_by: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp_seconds::option"
    )]
    pub ack_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_comment: Option<String>,
}

/// Generate a fresh `msg-<8hex>` identifier.
///
/// Collision odds at 4 random bytes are negligible for the scale this
/// broker targets (§3 "Message id is unique" relies on the datastore
/// write being the actual uniqueness guard, not this generator alone).
pub fn generate_message_id() -> String {
    let n: u32 = rand::random();
    format!("msg-{n:08x}")
}

/// Query filter for [`crate::kv::KvStore`]-backed lookups. See SPEC_FULL.md §3.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub to_instance: Option<String>,
    pub from_instance: Option<String>,
    pub msg_type: Option<MessageType>,
    pub pending_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
}

pub const DEFAULT_QUERY_LIMIT: u32 = 100;
pub const MAX_QUERY_LIMIT: u32 = 1000;

impl Default for MessageQuery {
    fn default() -> Self {
        MessageQuery {
            to_instance: None,
            from_instance: None,
            msg_type: None,
            pending_only: false,
            since: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl MessageQuery {
    pub fn with_limit(mut self, limit: u32) -> Result<Self, MessageError> {
        if !(1..=MAX_QUERY_LIMIT).contains(&limit) {
            return Err(MessageError::LimitOutOfRange {
                got: limit as i64,
                max: MAX_QUERY_LIMIT as i64,
            });
        }
        self.limit = limit;
        Ok(self)
    }
}

/// Compact projection of a publish, delivered live and queued offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event: String,
    pub message_id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(rename = "from")]
    pub from_instance: String,
    #[serde(rename = "to")]
    pub to_instance: String,
    pub requires_ack: bool,
    #[serde(with = "timestamp_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn from_envelope(msg: &MessageEnvelope) -> Self {
        NotificationEvent {
            event: "message_published".to_string(),
            message_id: msg.id.clone(),
            msg_type: msg.msg_type,
            from_instance: msg.from_instance.clone(),
            to_instance: msg.to_instance.clone(),
            requires_ack: msg.requires_ack,
            timestamp: msg.timestamp,
        }
    }
}

/// Liveness record for one instance, as returned by `get_presence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub instance_id: String,
    pub active: bool,
    #[serde(with = "timestamp_seconds")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub stale: bool,
    pub seconds_since_heartbeat: i64,
}

/// Aggregate counts returned by `stats()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationStats {
    pub total_messages: u64,
    pub pending_messages: u64,
    pub messages_by_type: std::collections::BTreeMap<String, u64>,
    pub active_instances: u64,
    pub instance_names: Vec<String>,
}

/// `serde(with = "timestamp_seconds")`: internal seconds-since-epoch
/// resolution, wire format `YYYY-MM-DDTHH:MM:SSZ`, accepting both the `Z`
/// suffix and an explicit offset on the way in (SPEC_FULL.md §4.3).
pub mod timestamp_seconds {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error as DeError};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.trunc_subsecs(0).to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(DeError::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, MessageError> {
        let normalized = if let Some(stripped) = raw.strip_suffix('Z') {
            format!("{stripped}+00:00")
        } else {
            raw.to_string()
        };
        DateTime::parse_from_rfc3339(&normalized)
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
            .map_err(|e| MessageError::MalformedTimestamp(format!("{raw}: {e}")))
    }

    /// Render the wire format directly, for callers (like the broker's hash
    /// field writes) that aren't going through serde.
    pub fn to_wire(ts: DateTime<Utc>) -> String {
        ts.trunc_subsecs(0).to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|raw| super::parse(&raw).map_err(DeError::custom))
                .transpose()
        }
    }
}

pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
