// Sends normalized events on to the relay bus
//
// Anything matching an exclusion template stops here.

use crate::bus::Bus;
use crate::core::exclusion::ExclusionFilter;
use crate::core::Event;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, trace};

/// What happened to a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Published; number of subscribers it reached, when the bus knows
    Published(usize),
    /// Dropped by the exclusion filter
    Excluded,
}

pub struct Recorder {
    bus: Arc<dyn Bus>,
    exclusion: Arc<ExclusionFilter>,
    topic: String,
}

impl Recorder {
    pub fn new(bus: Arc<dyn Bus>, exclusion: Arc<ExclusionFilter>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            exclusion,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    // Filter, then publish. Bus errors go back to the caller, nothing is retried here.
    pub async fn record(&self, event: &Event) -> Result<RecordOutcome> {
        if self.exclusion.matches(&event.argv) {
            debug!(command = %event.command, "excluded");
            return Ok(RecordOutcome::Excluded);
        }

        let reached = self.bus.publish(&self.topic, event).await?;
        trace!(command = %event.command, reached, "published");
        Ok(RecordOutcome::Published(reached))
    }
}
