//! Audit trail forwarder.
//!
//! Reads the XML audit stream line by line (from stdin or a child process such
//! as `praudit -xl /dev/auditpipe`) and records every execution event it finds.

use crate::core::{Normalizer, RecordOutcome, Recorder};
use crate::error::{RecallError, Result};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// XML declaration and the opening `<audit>` element
pub const HEADER_LINES: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub lines: u64,
    pub published: u64,
    pub excluded: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct AuditForwarder {
    normalizer: Arc<Normalizer>,
    recorder: Arc<Recorder>,
}

impl AuditForwarder {
    pub fn new(normalizer: Arc<Normalizer>, recorder: Arc<Recorder>) -> Self {
        Self {
            normalizer,
            recorder,
        }
    }

    /// Forward every record in `reader` until EOF or cancellation
    ///
    /// Lines are raw bytes; env values can be anything, so undecodable bytes are
    /// replaced rather than failing the stream.
    pub async fn run<R>(&self, mut reader: R, cancel: CancellationToken) -> Result<ForwarderStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        let mut stats = ForwarderStats::default();

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }
            stats.lines += 1;

            if stats.lines <= HEADER_LINES as u64 {
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            let event = match self.normalizer.audit(line) {
                Some(event) => event,
                None => {
                    stats.skipped += 1;
                    continue;
                }
            };

            match self.recorder.record(&event).await {
                Ok(RecordOutcome::Published(_)) => stats.published += 1,
                Ok(RecordOutcome::Excluded) => stats.excluded += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(command = %event.command, error = %e, "could not publish audit event");
                }
            }
        }

        info!(
            lines = stats.lines,
            published = stats.published,
            excluded = stats.excluded,
            skipped = stats.skipped,
            "audit stream ended"
        );
        Ok(stats)
    }

    /// Spawn `program` and forward its stdout
    pub async fn run_command(
        &self,
        program: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<ForwarderStats> {
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(program, ?args, "audit source started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecallError::Generic(format!("{} has no stdout", program)))?;

        let stats = self.run(BufReader::new(stdout), cancel).await?;
        if let Ok(Some(status)) = child.try_wait() {
            debug!(%status, "audit source exited");
        }
        Ok(stats)
    }
}
