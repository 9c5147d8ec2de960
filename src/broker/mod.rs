//! Broker abstraction
//!
//! Workers coordinate only through a shared store and a pub/sub bus. The
//! traits here describe exactly the operations the worker needs so the
//! pipeline can run against Redis in production and against
//! [`InMemoryBroker`] in tests and one-shot local runs.
//!
//! - [`KeyValueStore`]: lists, plain keys, sorted sets
//! - [`EventPublisher`]: fire-and-forget broadcast
//! - [`SignalSource`]: blocking wait for "work available"
//! - [`JobQueue`]: claim/complete over a shared work list

pub mod memory;
pub mod redis_backend;

pub use memory::InMemoryBroker;
pub use redis_backend::RedisBroker;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Shared key-value/list/set store.
///
/// Every call is one discrete round trip; no lock is ever held across calls.
pub trait KeyValueStore: Send + Sync {
    /// Append to the tail of a list.
    fn list_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove and return the head of a list (`None` when empty).
    fn list_pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Last element of a list without removing it.
    fn list_last(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a key with no expiry.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a key only if it does not exist yet. Returns whether it was set.
    fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remove a key; deleting a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Add a member to a sorted set unless it is already present.
    fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;
}

/// Broadcast side of the pub/sub bus.
pub trait EventPublisher: Send + Sync {
    /// Publish a message; returns how many subscribers received it.
    fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;
}

/// Subscription to a signal channel.
pub trait SignalSource: Send {
    /// Block until a signal arrives or `timeout` elapses.
    ///
    /// Returns `Ok(true)` on a signal, `Ok(false)` on timeout.
    fn wait(&mut self, timeout: Duration) -> StoreResult<bool>;
}

/// A claimed work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Local id used to correlate log lines
    pub id: Uuid,
    /// Raw item as popped from the work list
    pub payload: String,
}

/// Competing-consumer queue.
pub trait JobQueue: Send + Sync {
    /// Push an item and signal waiting consumers.
    fn enqueue(&self, payload: &str) -> StoreResult<()>;

    /// Remove one item. `Ok(None)` means another consumer got there first;
    /// it is not an error.
    fn claim(&self) -> StoreResult<Option<Job>>;

    /// Mark a claimed job finished. There is no redelivery either way.
    fn complete(&self, job: &Job) -> StoreResult<()>;
}

/// [`JobQueue`] over a list in any [`KeyValueStore`] plus a signal channel.
pub struct SharedWorkList {
    store: Arc<dyn KeyValueStore>,
    publisher: Arc<dyn EventPublisher>,
    list: String,
    channel: String,
}

impl SharedWorkList {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        publisher: Arc<dyn EventPublisher>,
        list: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            list: list.into(),
            channel: channel.into(),
        }
    }

    pub fn list(&self) -> &str {
        &self.list
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl JobQueue for SharedWorkList {
    fn enqueue(&self, payload: &str) -> StoreResult<()> {
        self.store.list_push(&self.list, payload)?;
        let receivers = self.publisher.publish(&self.channel, payload)?;
        debug!("Enqueued {} ({} consumers signalled)", payload, receivers);
        Ok(())
    }

    fn claim(&self) -> StoreResult<Option<Job>> {
        Ok(self.store.list_pop(&self.list)?.map(|payload| Job {
            id: Uuid::new_v4(),
            payload,
        }))
    }

    fn complete(&self, job: &Job) -> StoreResult<()> {
        // Pop already removed the entry; nothing to acknowledge.
        debug!("Job {} ({}) complete", job.id, job.payload);
        Ok(())
    }
}

/// [`SignalSource`] fed by a channel; backends forward pub/sub messages here.
pub struct ChannelSignal {
    rx: Receiver<String>,
}

impl ChannelSignal {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }
}

impl SignalSource for ChannelSignal {
    fn wait(&mut self, timeout: Duration) -> StoreResult<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(_) => {
                // Coalesce a burst of signals into one wake-up
                while self.rx.try_recv().is_ok() {}
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Unavailable(
                "signal subscription closed".to_string(),
            )),
        }
    }
}
