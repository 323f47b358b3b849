//! In-memory [`KvStore`] used by this crate's and the broker crate's test
//! suites, so broker-client and tool-host behavior can be asserted without
//! a running Redis instance (SPEC_FULL.md §4.9 "no test talks to a real
//! Redis instance").

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{BoxStream, KvStore, PubSubMessage};
use crate::error::BackendError;

#[derive(Default)]
struct State {
    strings: HashMap<String, (String, Option<Instant>)>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, broadcast::Sender<PubSubMessage>>,
}

/// A single-process, in-memory stand-in for the shared Redis-like store.
/// All structures live behind one mutex: the real datastore's atomicity is
/// what the broker client relies on, and a single mutex reproduces that
/// for tests without pretending to model cross-process concurrency.
#[derive(Default)]
pub struct MemoryStore {
    state: StdMutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("MemoryStore mutex poisoned")
    }

    fn sweep_expired(state: &mut State, key: &str) {
        if let Some((_, Some(expires_at))) = state.strings.get(key) {
            if Instant::now() >= *expires_at {
                state.strings.remove(key);
            }
        }
    }
}

/// Resolve Redis-style (possibly negative) range bounds against `len`,
/// returning an inclusive `[start, stop]` pair clamped into range, or
/// `None` if the range is empty.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 { (len + i).max(0) } else { i }
    };
    let start = norm(start).min(len - 1).max(0);
    let stop = norm(stop).min(len - 1);
    if stop < start {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BackendError> {
        let mut state = self.lock();
        let expires_at = ttl.map(|d| Instant::now() + d);
        state.strings.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut state = self.lock();
        Self::sweep_expired(&mut state, key);
        Ok(state.strings.get(key).map(|(v, _)| v.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.strings.remove(key);
        state.hashes.remove(key);
        state.sets.remove(key);
        state.zsets.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(entry) = state.strings.get_mut(key) {
            entry.1 = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let state = self.lock();
        Ok(state.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, BackendError> {
        let state = self.lock();
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(h) = state.hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(s) = state.sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, BackendError> {
        let state = self.lock();
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let state = self.lock();
        Ok(state.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, BackendError> {
        let state = self.lock();
        Ok(state.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.zsets.entry(key.to_string()).or_default().insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> Result<Vec<String>, BackendError> {
        let state = self.lock();
        let Some(z) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, &f64)> = z.iter().collect();
        members.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap().then_with(|| a.0.cmp(b.0)));
        if rev {
            members.reverse();
        }
        let Some((lo, hi)) = resolve_range(start, stop, members.len()) else {
            return Ok(Vec::new());
        };
        Ok(members[lo..=hi].iter().map(|(m, _)| (*m).clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(z) = state.zsets.get_mut(key) {
            z.remove(member);
        }
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BackendError> {
        let state = self.lock();
        Ok(state.zsets.get(key).and_then(|z| z.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> Result<u64, BackendError> {
        let state = self.lock();
        Ok(state.zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), BackendError> {
        let mut state = self.lock();
        let Some(z) = state.zsets.get_mut(key) else {
            return Ok(());
        };
        let mut members: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        let Some((lo, hi)) = resolve_range(start, stop, members.len()) else {
            return Ok(());
        };
        for (member, _) in &members[lo..=hi] {
            z.remove(member);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.lists.entry(key.to_string()).or_default().push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut state = self.lock();
        Ok(state.lists.get_mut(key).and_then(|l| l.pop_front()))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, BackendError> {
        let state = self.lock();
        let Some(l) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        let Some((lo, hi)) = resolve_range(start, stop, l.len()) else {
            return Ok(Vec::new());
        };
        Ok(l.iter().skip(lo).take(hi - lo + 1).cloned().collect())
    }

    async fn llen(&self, key: &str) -> Result<u64, BackendError> {
        let state = self.lock();
        Ok(state.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        let state = self.lock();
        if let Some(tx) = state.channels.get(channel) {
            // No subscribers is not an error: SPEC_FULL.md §4.4 step 7 treats
            // live delivery as best-effort alongside the durable offline queue.
            let _ = tx.send(PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, PubSubMessage>, BackendError> {
        let mut state = self.lock();
        let tx = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        let rx = tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}
