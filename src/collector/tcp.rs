//! TCP collector: one JSON submission per line, one ack line per submission.

use super::CollectorState;
use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ack for an accepted (or excluded) submission
pub const ACK: &str = "ok\n";

pub struct TcpCollector {
    state: CollectorState,
    listener: TcpListener,
}

impl TcpCollector {
    pub async fn bind(addr: &str, state: CollectorState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { state, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "tcp collector listening");
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "collector accept failed");
                        continue;
                    }
                },
            };

            let state = self.state.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state, cancel).await {
                    debug!(%peer, error = %e, "collector connection closed with error");
                }
            });
        }
        info!("tcp collector stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: CollectorState,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        // bad bytes are the payload's problem, not the connection's
        let reply = match state.accept_json(&line).await {
            Ok(outcome) => {
                debug!(?outcome, "submission accepted");
                ACK.to_string()
            }
            Err(e) => {
                debug!(error = %e, "submission failed");
                // one line per reply, whatever the error says
                format!("error: {}\n", e.to_string().replace('\n', " "))
            }
        };
        write_half.write_all(reply.as_bytes()).await?;
    }
}
