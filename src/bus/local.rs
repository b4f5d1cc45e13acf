//! In-process relay bus built on per-topic broadcast channels.

use super::{Bus, Subscription, DEFAULT_CHANNEL_CAPACITY};
use crate::core::Event;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Cheap to clone; clones share the same topics.
#[derive(Debug, Clone)]
pub struct RelayBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Arc<Event>>>>>,
    capacity: usize,
}

impl RelayBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Broadcast to current subscribers of `topic`; returns how many got it.
    pub fn send(&self, topic: &str, event: Event) -> usize {
        let sender = {
            let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            topics.get(topic).cloned()
        };

        let Some(sender) = sender else {
            trace!(topic, "no subscribers ever, event dropped");
            return 0;
        };

        match sender.send(Arc::new(event)) {
            Ok(count) => {
                debug!(topic, receivers = count, "event published");
                count
            }
            Err(_) => {
                // No receivers right now - the event is lost, which is fine
                trace!(topic, "no receivers for event");
                0
            }
        }
    }

    pub fn receiver(&self, topic: &str) -> broadcast::Receiver<Arc<Event>> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Live receivers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map_or(0, |s| s.receiver_count())
    }
}

impl Default for RelayBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for RelayBus {
    async fn publish(&self, topic: &str, event: &Event) -> Result<usize> {
        Ok(self.send(topic, event.clone()))
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        Ok(Subscription::local(self.receiver(topic)))
    }
}
