//! Relay bus
//!
//! Fire-and-forget broadcast of events from producers to subscribers. Every active
//! subscription gets every event published on its topic after it subscribed; an event
//! published while nobody listens is gone. Events from one publisher arrive in order.
//!
//! [`RelayBus`] is the in-process bus. [`BusServer`] exposes one over TCP and
//! [`RemoteBus`] talks to it, so separate processes share the same channel.

pub mod local;
pub mod remote;

pub use local::RelayBus;
pub use remote::{BusServer, Frame, RemoteBus};

use crate::core::Event;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity per topic.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A pub/sub transport with at-most-once broadcast delivery.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish to `topic`. Returns how many subscribers it reached, when known.
    async fn publish(&self, topic: &str, event: &Event) -> Result<usize>;

    /// Start receiving events published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Endless stream of events for one subscriber.
///
/// Not replayable: dropping it and subscribing again starts from the present.
pub struct Subscription {
    source: Source,
}

enum Source {
    Local(broadcast::Receiver<Arc<Event>>),
    Remote(Lines<BufReader<OwnedReadHalf>>),
}

impl Subscription {
    pub(crate) fn local(receiver: broadcast::Receiver<Arc<Event>>) -> Self {
        Self {
            source: Source::Local(receiver),
        }
    }

    pub(crate) fn remote(lines: Lines<BufReader<OwnedReadHalf>>) -> Self {
        Self {
            source: Source::Remote(lines),
        }
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Event> {
        match &mut self.source {
            Source::Local(receiver) => loop {
                match receiver.recv().await {
                    Ok(event) => return Some(event.as_ref().clone()),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!(skipped = count, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Source::Remote(lines) => loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<Event>(&line) {
                        Ok(event) => return Some(event),
                        Err(e) => warn!(error = %e, "dropping undecodable event from bus"),
                    },
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(error = %e, "bus connection failed");
                        return None;
                    }
                }
            },
        }
    }
}
