//! Redis broker backend
//!
//! One command connection guarded by a mutex serves all store and publish
//! calls. Dropped connections are re-established lazily on the next call.
//! Each subscription owns its own connection on a dedicated thread and
//! forwards messages into a crossbeam channel.

use crossbeam_channel::{unbounded, Sender};
use redis::{Client, Commands, Connection, IntoConnectionInfo, RedisResult};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChannelSignal, EventPublisher, KeyValueStore};
use crate::error::{StoreError, StoreResult};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct RedisBroker {
    client: Client,
    timeout: Duration,
    con: Mutex<Option<Connection>>,
}

impl RedisBroker {
    /// Connect and verify the server answers `PING`.
    ///
    /// Failing here is fatal for a worker: it cannot run without its queue.
    pub fn connect(url: &str, password: Option<&str>, timeout: Duration) -> StoreResult<Self> {
        let mut info = url.into_connection_info().map_err(StoreError::from_redis)?;
        if let Some(pass) = password {
            info.redis.password = Some(pass.to_string());
        }
        let client = Client::open(info).map_err(StoreError::from_redis)?;

        let broker = Self {
            client,
            timeout,
            con: Mutex::new(None),
        };

        let mut con = broker.open_connection()?;
        let pong: String = redis::cmd("PING")
            .query(&mut con)
            .map_err(StoreError::from_redis)?;
        debug!("Broker answered {}", pong);
        *broker.lock()? = Some(con);

        info!("Connected to broker at {}", url);
        Ok(broker)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let con = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(StoreError::from_redis)?;
        con.set_read_timeout(Some(self.timeout))
            .map_err(StoreError::from_redis)?;
        con.set_write_timeout(Some(self.timeout))
            .map_err(StoreError::from_redis)?;
        Ok(con)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
        self.con
            .lock()
            .map_err(|_| StoreError::Unavailable("redis connection lock poisoned".into()))
    }

    /// Run one command, reconnecting first if the last one dropped the link.
    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> RedisResult<T>) -> StoreResult<T> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.open_connection()?);
        }
        let Some(con) = guard.as_mut() else {
            return Err(StoreError::Unavailable("no redis connection".into()));
        };

        match op(con) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
                    warn!("Dropping redis connection after error: {}", err);
                    *guard = None;
                }
                Err(StoreError::from_redis(err))
            }
        }
    }

    /// Subscribe to `channel` on a background thread.
    ///
    /// The first connection is made on the calling thread so an unreachable
    /// broker is reported immediately.
    pub fn subscribe(&self, channel: &str) -> StoreResult<ChannelSignal> {
        let con = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(StoreError::from_redis)?;
        let (tx, rx) = unbounded();
        let client = self.client.clone();
        let channel = channel.to_string();

        thread::Builder::new()
            .name(format!("qfarm-sub-{}", channel))
            .spawn(move || subscription_loop(client, con, channel, tx))
            .map_err(|e| StoreError::Unavailable(format!("can't spawn subscriber: {}", e)))?;

        Ok(ChannelSignal::new(rx))
    }
}

fn subscription_loop(client: Client, mut con: Connection, channel: String, tx: Sender<String>) {
    loop {
        match forward_messages(&mut con, &channel, &tx) {
            Ok(()) => {
                debug!("Subscriber for {} stopped: receiver gone", channel);
                return;
            }
            Err(e) => warn!("Subscription to {} lost: {}", channel, e),
        }

        loop {
            thread::sleep(RECONNECT_DELAY);
            match client.get_connection() {
                Ok(fresh) => {
                    info!("Re-subscribed to {}", channel);
                    con = fresh;
                    break;
                }
                Err(e) => warn!("Reconnect for {} failed: {}", channel, e),
            }
        }
    }
}

/// Returns `Ok(())` once the receiving side hangs up.
fn forward_messages(con: &mut Connection, channel: &str, tx: &Sender<String>) -> RedisResult<()> {
    let mut pubsub = con.as_pubsub();
    pubsub.set_read_timeout(None)?;
    pubsub.subscribe(channel)?;
    debug!("Subscribed to {}", channel);

    loop {
        let msg = pubsub.get_message()?;
        let payload: String = msg.get_payload().unwrap_or_default();
        if tx.send(payload).is_err() {
            return Ok(());
        }
    }
}

impl KeyValueStore for RedisBroker {
    fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|con| con.rpush::<_, _, ()>(key, value))
    }

    fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|con| con.lpop(key, None))
    }

    fn list_last(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|con| con.lindex(key, -1))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|con| con.set::<_, _, ()>(key, value))
    }

    fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.with_conn(|con| con.set_nx(key, value))
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|con| con.get(key))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_conn(|con| con.del::<_, ()>(key))
    }

    fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.with_conn(|con| {
            redis::cmd("ZADD")
                .arg(key)
                .arg("NX")
                .arg(score)
                .arg(member)
                .query::<()>(con)
        })
    }
}

impl EventPublisher for RedisBroker {
    fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        self.with_conn(|con| con.publish(channel, message))
    }
}
