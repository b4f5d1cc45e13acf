//! Collector services
//!
//! Entry points that take raw captures from the outside world (shell hook
//! submissions over HTTP or TCP, audit trail lines) and push them through
//! normalization, exclusion, and onto the relay bus.

pub mod audit;
pub mod client;
pub mod http;
pub mod tcp;

pub use audit::AuditForwarder;
pub use client::SubmitClient;
pub use http::router;
pub use tcp::TcpCollector;

use crate::core::{Normalizer, RecordOutcome, Recorder, Submission};
use crate::error::Result;
use std::sync::Arc;

/// Shared by every collector connection and request
#[derive(Clone)]
pub struct CollectorState {
    normalizer: Arc<Normalizer>,
    recorder: Arc<Recorder>,
}

impl CollectorState {
    pub fn new(normalizer: Arc<Normalizer>, recorder: Arc<Recorder>) -> Self {
        Self {
            normalizer,
            recorder,
        }
    }

    /// Decode a JSON submission body and record it
    pub async fn accept_json(&self, body: &[u8]) -> Result<RecordOutcome> {
        let submission: Submission = serde_json::from_slice(body)?;
        self.accept(submission).await
    }

    pub async fn accept(&self, submission: Submission) -> Result<RecordOutcome> {
        let event = self.normalizer.submission(submission)?;
        self.recorder.record(&event).await
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }
}
