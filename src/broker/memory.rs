//! In-process broker
//!
//! Implements the broker traits with plain maps behind a mutex and
//! crossbeam channels for pub/sub. Used by `qfarm-worker analyze` for
//! one-shot local runs and by the test suite as a fake Redis.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{ChannelSignal, EventPublisher, KeyValueStore};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    keys: HashMap<String, String>,
    sorted_sets: HashMap<String, BTreeMap<String, f64>>,
    /// Writes to keys starting with any of these are rejected
    failing_prefixes: Vec<String>,
}

impl MemoryState {
    fn check_write(&self, key: &str) -> StoreResult<()> {
        if self.failing_prefixes.iter().any(|p| key.starts_with(p)) {
            return Err(StoreError::Rejected(key.to_string()));
        }
        Ok(())
    }
}

/// Thread-safe in-memory broker.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<MemoryState>,
    subscribers: Mutex<HashMap<String, Vec<Sender<String>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory broker state poisoned".into()))
    }

    /// Subscribe to a channel as a signal source.
    pub fn subscribe(&self, channel: &str) -> ChannelSignal {
        ChannelSignal::new(self.subscribe_raw(channel))
    }

    /// Subscribe to a channel and receive raw message payloads.
    pub fn subscribe_raw(&self, channel: &str) -> Receiver<String> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.entry(channel.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Make every subsequent write to keys with this prefix fail.
    pub fn fail_writes_with_prefix(&self, prefix: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_prefixes.push(prefix.to_string());
        }
    }

    /// Snapshot of a list's contents.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.lists.get(key).map(|l| l.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Plain keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .map(|s| {
                s.keys
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Members of a sorted set, ordered by member name.
    pub fn sorted_set_members(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.sorted_sets.get(key).map(|z| z.keys().cloned().collect()))
            .unwrap_or_default()
    }
}

impl KeyValueStore for InMemoryBroker {
    fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_write(key)?;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state()?;
        Ok(state.lists.get_mut(key).and_then(|l| l.pop_front()))
    }

    fn list_last(&self, key: &str) -> StoreResult<Option<String>> {
        let state = self.state()?;
        Ok(state.lists.get(key).and_then(|l| l.back().cloned()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_write(key)?;
        state.keys.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.check_write(key)?;
        if state.keys.contains_key(key) {
            return Ok(false);
        }
        state.keys.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state()?.keys.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_write(key)?;
        state.keys.remove(key);
        Ok(())
    }

    fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_write(key)?;
        state
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(score);
        Ok(())
    }
}

impl EventPublisher for InMemoryBroker {
    fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory subscribers poisoned".into()))?;
        let Some(listeners) = subs.get_mut(channel) else {
            return Ok(0);
        };
        // Drop listeners whose receiver is gone
        listeners.retain(|tx| tx.send(message.to_string()).is_ok());
        Ok(listeners.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.list_last("l").unwrap(), None);
        broker.list_push("l", "a").unwrap();
        broker.list_push("l", "b").unwrap();
        assert_eq!(broker.list_last("l").unwrap().as_deref(), Some("b"));
        assert_eq!(broker.list_pop("l").unwrap().as_deref(), Some("a"));
        assert_eq!(broker.list("l"), vec!["b".to_string()]);
    }

    #[test]
    fn test_set_if_absent() {
        let broker = InMemoryBroker::new();
        assert!(broker.set_if_absent("k", "1").unwrap());
        assert!(!broker.set_if_absent("k", "2").unwrap());
        assert_eq!(broker.get("k").unwrap().as_deref(), Some("1"));

        broker.delete("k").unwrap();
        broker.delete("k").unwrap();
        assert!(broker.set_if_absent("k", "3").unwrap());
    }

    #[test]
    fn test_sorted_set_add_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.sorted_set_add("users:u:repos", "h/u/r", 1.0).unwrap();
        broker.sorted_set_add("users:u:repos", "h/u/r", 2.0).unwrap();
        assert_eq!(broker.sorted_set_members("users:u:repos"), vec!["h/u/r"]);
    }

    #[test]
    fn test_failing_prefix() {
        let broker = InMemoryBroker::new();
        broker.fail_writes_with_prefix("reports:");
        assert!(matches!(
            broker.set("reports:x:1", "{}"),
            Err(StoreError::Rejected(_))
        ));
        assert!(broker.set("files:x:1:/", "{}").is_ok());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.publish("events", "{}").unwrap(), 0);

        // late subscribers do not see earlier messages
        let rx = broker.subscribe_raw("events");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.publish("events", "late").unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), "late");
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let broker = InMemoryBroker::new();
        let rx = broker.subscribe_raw("events");
        drop(rx);
        assert_eq!(broker.publish("events", "x").unwrap(), 0);
    }
}
