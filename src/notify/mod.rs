//! Lifecycle event notifications
//!
//! Events are JSON-encoded and published on one broadcast channel. Delivery
//! is at-most-once to whoever is subscribed right now; nothing is buffered
//! and a failed publish never fails the job.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::EventPublisher;
use crate::models::{Event, EventType, RepoId};

pub const ALL_DONE_MSG: &str = "All tasks done!";
pub const ALREADY_ANALYZED_MSG: &str = "Repo already analyzed";

#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
    channel: String,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn EventPublisher>, channel: impl Into<String>) -> Self {
        Self {
            publisher,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn send_event(&self, repo: &RepoId, msg: &str, kind: EventType) {
        self.publish(Event {
            repo: repo.to_string(),
            msg: msg.to_string(),
            kind,
            payload: None,
        });
    }

    pub fn send_event_with_payload(
        &self,
        repo: &RepoId,
        msg: &str,
        kind: EventType,
        payload: impl Into<String>,
    ) {
        self.publish(Event {
            repo: repo.to_string(),
            msg: msg.to_string(),
            kind,
            payload: Some(payload.into()),
        });
    }

    /// Error event for a job whose identifier may not even have parsed.
    pub fn send_error(&self, repo: &str, text: &str) {
        self.publish(Event {
            repo: repo.to_string(),
            msg: format!("Error: {}", text),
            kind: EventType::Error,
            payload: None,
        });
    }

    fn publish(&self, event: Event) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Can't encode {} event for {}: {}", event.kind, event.repo, e);
                return;
            }
        };

        match self.publisher.publish(&self.channel, &json) {
            Ok(receivers) => debug!(
                "Sent {} event for {} to {} listeners",
                event.kind, event.repo, receivers
            ),
            Err(e) => warn!(
                "Can't publish {} event for {}: {}",
                event.kind, event.repo, e
            ),
        }
    }
}
