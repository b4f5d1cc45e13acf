//! Capture client used by the shell hooks (`totalrecall submit`).

use super::{http, tcp};
use crate::config::{CollectorConfig, Transport};
use crate::core::Submission;
use crate::error::{RecallError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

pub struct SubmitClient {
    transport: Transport,
    tcp_addr: String,
    http_url: String,
    timeout: Duration,
}

impl SubmitClient {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            transport: config.transport,
            tcp_addr: config.tcp_addr.clone(),
            http_url: format!("http://{}/", config.http_addr),
            timeout: config.timeout(),
        }
    }

    pub async fn send(&self, submission: &Submission) -> Result<()> {
        match self.transport {
            Transport::Tcp => self.send_tcp(submission).await,
            Transport::Http => self.send_http(submission).await,
        }
    }

    async fn send_tcp(&self, submission: &Submission) -> Result<()> {
        let exchange = async {
            let stream = TcpStream::connect(&self.tcp_addr).await?;
            let (read_half, mut write_half) = stream.into_split();

            let mut line = serde_json::to_vec(submission)?;
            line.push(b'\n');
            write_half.write_all(&line).await?;

            let mut reply = String::new();
            BufReader::new(read_half).read_line(&mut reply).await?;
            Ok::<String, RecallError>(reply)
        };

        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RecallError::Transport(format!("{}: timed out", self.tcp_addr)))??;

        if reply == tcp::ACK {
            debug!("submission acked");
            Ok(())
        } else {
            Err(RecallError::Transport(
                reply.trim_end().trim_start_matches("error: ").to_string(),
            ))
        }
    }

    async fn send_http(&self, submission: &Submission) -> Result<()> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let resp = client.put(&self.http_url).json(submission).send().await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() && body == http::ACK {
            debug!("submission acked");
            Ok(())
        } else {
            Err(RecallError::Transport(format!("{}: {}", status, body.trim_end())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, RelayBus};
    use crate::collector::test_support::{state, TOPIC};
    use crate::collector::TcpCollector;
    use crate::core::submission::CommandEncoding;
    use std::collections::BTreeMap;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn submission(command: &str) -> Submission {
        Submission {
            command: command.to_string(),
            command_encoding: Some(CommandEncoding::Plain),
            return_code: 0,
            start_timestamp: "2024-03-01T10:00:00Z".to_string(),
            end_timestamp: None,
            env: BTreeMap::new(),
            hostname: None,
        }
    }

    fn config(transport: Transport, tcp_addr: String, http_addr: String) -> CollectorConfig {
        CollectorConfig {
            http_addr,
            tcp_addr,
            timeout_ms: 2_000,
            transport,
        }
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let bus = RelayBus::new();
        let mut sub = bus.subscribe(TOPIC).await.unwrap();
        let collector = TcpCollector::bind("127.0.0.1:0", state(&bus)).await.unwrap();
        let addr = collector.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(collector.run(cancel.clone()));

        let client = SubmitClient::new(&config(Transport::Tcp, addr, String::new()));
        client.send(&submission("make check")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().command, "make check");

        let err = client.send(&submission("  ")).await.unwrap_err();
        assert!(matches!(err, RecallError::Transport(msg) if msg.contains("empty command")));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_http_roundtrip() {
        let bus = RelayBus::new();
        let mut sub = bus.subscribe(TOPIC).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(http::serve(listener, state(&bus), cancel.clone()));

        let client = SubmitClient::new(&config(Transport::Http, String::new(), addr));
        client.send(&submission("cargo doc")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().command, "cargo doc");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = SubmitClient::new(&config(Transport::Tcp, addr, String::new()));
        assert!(client.send(&submission("ls")).await.is_err());
    }
}
