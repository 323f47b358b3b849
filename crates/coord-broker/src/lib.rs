//! # coord-broker
//!
//! The coordination broker's transactional engine (SPEC_FULL.md §4.4):
//! `publish`, `get`, `query`, `acknowledge`, `register`, `heartbeat`,
//! `unregister`, `get_presence`, `pop_notifications`, `stats`.
//!
//! [`BrokerClient`] is constructed with a [`coord_core::KvStore`], a
//! [`coord_core::Config`], and the caller's identity; both are set at
//! construction and treated as immutable thereafter (§5 "Shared-resource
//! policy").

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use coord_core::kv::KvStore;
use coord_core::types::{
    BROADCAST_TARGET, CoordinationStats, MessageEnvelope, MessagePayload, MessageQuery,
    MessageType, NotificationEvent, PresenceRecord, generate_message_id, now_seconds,
};
use coord_core::Config;

pub struct BrokerClient {
    store: Arc<dyn KvStore>,
    config: Config,
    identity: String,
}

impl BrokerClient {
    pub fn new(store: Arc<dyn KvStore>, config: Config, identity: impl Into<String>) -> Self {
        BrokerClient {
            store,
            config,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn require_valid_identity(&self, from_instance: &str) -> Result<()> {
        if from_instance != self.identity {
            bail!(
                "publish sender '{from_instance}' does not match client identity '{}'",
                self.identity
            );
        }
        if from_instance.is_empty() || from_instance == "unknown" {
            bail!("sender identity must not be empty or \"unknown\"");
        }
        Ok(())
    }

    /// Publish a message. See SPEC_FULL.md §4.4 for the fixed, seven-step
    /// write sequence; every step after envelope-and-timeline is benign if
    /// it fails partway (§5 "Cancellation and timeouts").
    pub async fn publish(
        &self,
        msg_type: MessageType,
        subject: &str,
        description: &str,
        from_instance: &str,
        to_instance: &str,
        requires_ack: bool,
    ) -> Result<MessageEnvelope> {
        self.require_valid_identity(from_instance)?;

        let id = generate_message_id();
        let timestamp = now_seconds();
        let envelope = MessageEnvelope {
            id: id.clone(),
            msg_type,
            from_instance: from_instance.to_string(),
            to_instance: to_instance.to_string(),
            timestamp,
            requires_ack,
            acknowledged: false,
            payload: MessagePayload {
                subject: subject.to_string(),
                description: description.to_string(),
            },
            ack_by: None,
            ack_timestamp: None,
            ack_comment: None,
        };

        // 1-2: write the envelope hash with its full field set and TTL.
        self.write_envelope(&envelope)
            .await
            .context("failed to write message envelope")?;

        // 3-4: add to the timeline, then trim back to the configured cap.
        let score = timestamp.timestamp() as f64;
        self.store
            .zadd(&self.config.timeline_key(), &id, score)
            .await
            .context("failed to add message to timeline")?;
        self.trim_timeline().await.context("failed to trim timeline")?;

        // 5: fan out to inbox/inboxes.
        let targets = self.resolve_targets(to_instance).await?;
        for target in &targets {
            self.store
                .sadd(&self.config.inbox_key(target), &id)
                .await
                .context("failed to add message to inbox")?;
        }

        // 6: pending set, only when an ack is required.
        if requires_ack {
            self.store
                .sadd(&self.config.pending_key(), &id)
                .await
                .context("failed to add message to pending set")?;
        }

        // 7: notification fan-out, live and offline.
        let event = NotificationEvent::from_envelope(&envelope);
        let payload = serde_json::to_string(&event).context("failed to serialize notification event")?;
        for target in &targets {
            self.store
                .publish(&self.config.instance_channel(target), &payload)
                .await
                .context("failed to publish live notification")?;
            self.store
                .rpush(&self.config.notify_queue_key(target), &payload)
                .await
                .context("failed to enqueue offline notification")?;
        }
        if to_instance == BROADCAST_TARGET {
            self.store
                .publish(&self.config.broadcast_channel(), &payload)
                .await
                .context("failed to publish broadcast notification")?;
        }

        tracing::info!(message_id = %id, from = from_instance, to = to_instance, "published message");
        Ok(envelope)
    }

    async fn write_envelope(&self, envelope: &MessageEnvelope) -> Result<()> {
        let key = self.config.message_key(&envelope.id);
        for (field, value) in envelope_fields(envelope) {
            self.store.hset(&key, field, &value).await?;
        }
        self.store.expire(&key, self.config.message_ttl()).await?;
        Ok(())
    }

    async fn trim_timeline(&self) -> Result<()> {
        let cap = self.config.timeline_max_size;
        let size = self.store.zcard(&self.config.timeline_key()).await?;
        if size > cap {
            let overflow = (size - cap) as i64;
            self.store
                .zremrangebyrank(&self.config.timeline_key(), 0, overflow - 1)
                .await?;
        }
        Ok(())
    }

    /// `to="all"` fans out to every instance currently known to the
    /// presence registry, snapshotted at publish time (§9 "Broadcast
    /// semantics").
    async fn resolve_targets(&self, to_instance: &str) -> Result<Vec<String>> {
        if to_instance != BROADCAST_TARGET {
            return Ok(vec![to_instance.to_string()]);
        }
        let fields = self.store.hgetall(&self.config.presence_key()).await?;
        let mut instances: Vec<String> = fields
            .iter()
            .filter_map(|(field, _)| field.strip_suffix(".active").map(|s| s.to_string()))
            .collect();
        instances.sort();
        instances.dedup();
        Ok(instances)
    }

    /// Single hash read; not-found if the TTL elapsed or the id was never written.
    pub async fn get(&self, id: &str) -> Result<Option<MessageEnvelope>> {
        let fields = self.store.hgetall(&self.config.message_key(id)).await?;
        Ok(envelope_from_fields(id, &fields))
    }

    /// Compute a candidate id set, filter, load, and order newest-first
    /// (§4.4 "query").
    pub async fn query(&self, filter: &MessageQuery) -> Result<Vec<MessageEnvelope>> {
        let candidate_ids = if let Some(to) = &filter.to_instance {
            self.store.smembers(&self.config.inbox_key(to)).await?
        } else if filter.pending_only {
            self.store.smembers(&self.config.pending_key()).await?
        } else {
            self.store.zrange(&self.config.timeline_key(), 0, -1, false).await?
        };

        let mut envelopes = Vec::new();
        for id in candidate_ids {
            let Some(envelope) = self.get(&id).await? else {
                continue;
            };
            if let Some(from) = &filter.from_instance {
                if &envelope.from_instance != from {
                    continue;
                }
            }
            if let Some(msg_type) = filter.msg_type {
                if envelope.msg_type != msg_type {
                    continue;
                }
            }
            if filter.pending_only && !(envelope.requires_ack && !envelope.acknowledged) {
                continue;
            }
            if let Some(since) = filter.since {
                if envelope.timestamp < since {
                    continue;
                }
            }
            envelopes.push(envelope);
        }

        envelopes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        let limit = filter.limit.max(1) as usize;
        envelopes.truncate(limit);
        Ok(envelopes)
    }

    /// Idempotent: a second call converges to the same state and still
    /// returns `true` (§4.4 "acknowledge").
    pub async fn acknowledge(&self, id: &str, ack_by: &str, comment: Option<&str>) -> Result<bool> {
        let key = self.config.message_key(id);
        if self.store.hget(&key, "id").await?.is_none() {
            return Ok(false);
        }
        self.store.hset(&key, "acknowledged", "true").await?;
        self.store.hset(&key, "ack_by", ack_by).await?;
        self.store
            .hset(
                &key,
                "ack_timestamp",
                &coord_core::types::timestamp_seconds::to_wire(now_seconds()),
            )
            .await?;
        if let Some(comment) = comment {
            self.store.hset(&key, "ack_comment", comment).await?;
        }
        self.store.srem(&self.config.pending_key(), id).await?;
        Ok(true)
    }

    pub async fn register(&self, instance: &str, session_id: Option<&str>) -> Result<()> {
        let key = self.config.presence_key();
        self.store.hset(&key, &format!("{instance}.active"), "1").await?;
        self.store
            .hset(
                &key,
                &format!("{instance}.last_heartbeat"),
                &coord_core::types::timestamp_seconds::to_wire(now_seconds()),
            )
            .await?;
        if let Some(session_id) = session_id {
            self.store
                .hset(&key, &format!("{instance}.session_id"), session_id)
                .await?;
        }
        Ok(())
    }

    pub async fn heartbeat(&self, instance: &str) -> Result<()> {
        self.store
            .hset(
                &self.config.presence_key(),
                &format!("{instance}.last_heartbeat"),
                &coord_core::types::timestamp_seconds::to_wire(now_seconds()),
            )
            .await?;
        Ok(())
    }

    pub async fn unregister(&self, instance: &str) -> Result<()> {
        let key = self.config.presence_key();
        self.store.hdel(&key, &format!("{instance}.active")).await?;
        self.store.hdel(&key, &format!("{instance}.session_id")).await?;
        Ok(())
    }

    /// Inclusive staleness: exactly-at-threshold counts as stale
    /// (§8 "Boundary behaviors").
    pub async fn get_presence(&self, staleness: std::time::Duration) -> Result<BTreeMap<String, PresenceRecord>> {
        let fields = self.store.hgetall(&self.config.presence_key()).await?;
        let mut by_instance: BTreeMap<String, (Option<bool>, Option<String>, Option<String>)> = BTreeMap::new();
        for (field, value) in fields {
            let Some((instance, suffix)) = field.split_once('.') else {
                continue;
            };
            let entry = by_instance.entry(instance.to_string()).or_default();
            match suffix {
                "active" => entry.0 = Some(value == "1" || value == "true"),
                "last_heartbeat" => entry.1 = Some(value),
                "session_id" => entry.2 = Some(value),
                _ => {}
            }
        }

        let now = Utc::now();
        let mut result = BTreeMap::new();
        for (instance, (active, last_heartbeat, session_id)) in by_instance {
            let (last_heartbeat, seconds_since, stale) = match last_heartbeat {
                Some(raw) => {
                    let ts = coord_core::types::timestamp_seconds::parse(&raw)
                        .unwrap_or_else(|_| now_seconds());
                    let elapsed = (now - ts).num_seconds().max(0);
                    (ts, elapsed, elapsed as u64 >= staleness.as_secs())
                }
                // Missing last_heartbeat is treated as infinitely stale.
                None => (now_seconds(), i64::MAX, true),
            };
            result.insert(
                instance.clone(),
                PresenceRecord {
                    instance_id: instance,
                    active: active.unwrap_or(false) && !stale,
                    last_heartbeat,
                    session_id,
                    stale,
                    seconds_since_heartbeat: seconds_since,
                },
            );
        }
        Ok(result)
    }

    /// Left-pops up to `limit` entries, oldest first; never more than asked.
    pub async fn pop_notifications(&self, instance: &str, limit: u32) -> Result<Vec<NotificationEvent>> {
        let key = self.config.notify_queue_key(instance);
        let mut events = Vec::new();
        for _ in 0..limit {
            let Some(raw) = self.store.lpop(&key).await? else {
                break;
            };
            let event: NotificationEvent = serde_json::from_str(&raw).context("malformed queued notification")?;
            events.push(event);
        }
        Ok(events)
    }

    pub async fn stats(&self) -> Result<CoordinationStats> {
        let total_messages = self.store.zcard(&self.config.timeline_key()).await?;
        let pending_messages = self.store.scard(&self.config.pending_key()).await?;

        let timeline_ids = self
            .store
            .zrange(&self.config.timeline_key(), 0, -1, false)
            .await?;
        let mut messages_by_type = BTreeMap::new();
        for id in &timeline_ids {
            if let Some(envelope) = self.get(id).await? {
                *messages_by_type.entry(envelope.msg_type.as_str().to_string()).or_insert(0u64) += 1;
            }
        }

        let presence = self.get_presence(self.config.presence_staleness()).await?;
        let active_instances: Vec<String> = presence
            .values()
            .filter(|p| p.active)
            .map(|p| p.instance_id.clone())
            .collect();

        Ok(CoordinationStats {
            total_messages,
            pending_messages,
            messages_by_type,
            active_instances: active_instances.len() as u64,
            instance_names: active_instances,
        })
    }
}

fn envelope_fields(envelope: &MessageEnvelope) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", envelope.id.clone()),
        ("type", envelope.msg_type.as_str().to_string()),
        ("from_instance", envelope.from_instance.clone()),
        ("to_instance", envelope.to_instance.clone()),
        (
            "timestamp",
            coord_core::types::timestamp_seconds::to_wire(envelope.timestamp),
        ),
        ("requires_ack", envelope.requires_ack.to_string()),
        ("acknowledged", envelope.acknowledged.to_string()),
        ("subject", envelope.payload.subject.clone()),
        ("description", envelope.payload.description.clone()),
    ];
    if let Some(ack_by) = &envelope.ack_by {
        fields.push(("ack_by", ack_by.clone()));
    }
    if let Some(ack_timestamp) = envelope.ack_timestamp {
        fields.push((
            "ack_timestamp",
            coord_core::types::timestamp_seconds::to_wire(ack_timestamp),
        ));
    }
    if let Some(ack_comment) = &envelope.ack_comment {
        fields.push(("ack_comment", ack_comment.clone()));
    }
    fields
}

fn envelope_from_fields(id: &str, fields: &[(String, String)]) -> Option<MessageEnvelope> {
    let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

    let msg_type = MessageType::parse(&get("type")?).ok()?;
    let from_instance = get("from_instance")?;
    let to_instance = get("to_instance")?;
    let timestamp = coord_core::types::timestamp_seconds::parse(&get("timestamp")?).ok()?;
    let requires_ack = get("requires_ack")?.parse().ok()?;
    let acknowledged = get("acknowledged")?.parse().ok()?;
    let subject = get("subject")?;
    let description = get("description")?;

    Some(MessageEnvelope {
        id: id.to_string(),
        msg_type,
        from_instance,
        to_instance,
        timestamp,
        requires_ack,
        acknowledged,
        payload: MessagePayload { subject, description },
        ack_by: get("ack_by"),
        ack_timestamp: get("ack_timestamp").and_then(|raw| coord_core::types::timestamp_seconds::parse(&raw).ok()),
        ack_comment: get("ack_comment"),
    })
}

#[cfg(test)]
mod tests;
