//! Relay bus over TCP.
//!
//! Newline-delimited JSON frames. A connection either keeps sending `publish` frames,
//! or sends one `subscribe` frame, gets a `subscribed` line back, and from then on
//! only reads events (one JSON event per line).

use super::{Bus, RelayBus, Subscription};
use crate::core::Event;
use crate::error::{RecallError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// One line on the bus wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Publish { topic: String, event: Event },
    Subscribe { topic: String },
    Subscribed,
}

/// Serves a [`RelayBus`] to other processes
pub struct BusServer {
    bus: RelayBus,
    listener: TcpListener,
}

impl BusServer {
    pub async fn bind(addr: &str, bus: RelayBus) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { bus, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "bus server listening");
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "bus accept failed");
                        continue;
                    }
                },
            };

            let bus = self.bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, bus, cancel).await {
                    debug!(%peer, error = %e, "bus connection closed with error");
                }
            });
        }
        info!("bus server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    bus: RelayBus,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => return Ok(()),
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Publish { topic, event }) => {
                bus.send(&topic, event);
            }
            Ok(Frame::Subscribe { topic }) => {
                return stream_to_subscriber(&topic, &bus, write_half, cancel).await;
            }
            Ok(Frame::Subscribed) => trace!("ignoring stray ack frame"),
            Err(e) => warn!(error = %e, "dropping malformed bus frame"),
        }
    }
}

async fn stream_to_subscriber(
    topic: &str,
    bus: &RelayBus,
    write_half: OwnedWriteHalf,
    cancel: CancellationToken,
) -> Result<()> {
    let mut subscription = Subscription::local(bus.receiver(topic));
    let mut writer = BufWriter::new(write_half);

    write_line(&mut writer, &serde_json::to_string(&Frame::Subscribed)?).await?;
    debug!(topic, "remote subscriber attached");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = subscription.next() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };
        // a failed write means the subscriber went away
        write_line(&mut writer, &serde_json::to_string(&event)?).await?;
    }
}

async fn write_line(writer: &mut BufWriter<OwnedWriteHalf>, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Client side of [`BusServer`]
pub struct RemoteBus {
    addr: String,
    timeout: Duration,
    publisher: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
}

impl RemoteBus {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            publisher: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(RecallError::Bus(format!("connect {}: {}", self.addr, e))),
            Err(_) => Err(RecallError::Bus(format!("connect {}: timed out", self.addr))),
        }
    }
}

#[async_trait]
impl Bus for RemoteBus {
    /// Remote publishes can't know the receiver count, so they report 0.
    async fn publish(&self, topic: &str, event: &Event) -> Result<usize> {
        let frame = serde_json::to_string(&Frame::Publish {
            topic: topic.to_string(),
            event: event.clone(),
        })?;

        let mut publisher = self.publisher.lock().await;
        if publisher.is_none() {
            let (_, write_half) = self.connect().await?.into_split();
            *publisher = Some(BufWriter::new(write_half));
        }

        if let Some(writer) = publisher.as_mut() {
            if let Err(e) = write_line(writer, &frame).await {
                // no retry; the next publish reconnects
                *publisher = None;
                return Err(RecallError::Bus(e.to_string()));
            }
        }
        Ok(0)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (read_half, mut write_half) = self.connect().await?.into_split();

        let frame = serde_json::to_string(&Frame::Subscribe {
            topic: topic.to_string(),
        })?;
        write_half.write_all(frame.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        let mut lines = BufReader::new(read_half).lines();
        let ack = tokio::time::timeout(self.timeout, lines.next_line())
            .await
            .map_err(|_| RecallError::Bus("no subscribe ack".to_string()))??;

        match ack.as_deref().map(serde_json::from_str::<Frame>) {
            Some(Ok(Frame::Subscribed)) => {}
            other => {
                return Err(RecallError::Bus(format!("unexpected subscribe reply: {:?}", other)))
            }
        }

        // the server stops reading after the subscribe frame, so the write half can go
        drop(write_half);
        Ok(Subscription::remote(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(command: &str) -> Event {
        Event::new(command, vec![command.to_string()], BTreeMap::new(), 0, Utc::now())
    }

    async fn start_server() -> (String, RelayBus, CancellationToken) {
        let bus = RelayBus::new();
        let server = BusServer::bind("127.0.0.1:0", bus.clone()).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (addr, bus, cancel)
    }

    async fn wait_for_subscribers(bus: &RelayBus, topic: &str, n: usize) {
        for _ in 0..100 {
            if bus.subscriber_count(topic) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscribers never attached");
    }

    #[tokio::test]
    async fn test_remote_publish_reaches_local_and_remote_subscribers() {
        let (addr, bus, cancel) = start_server().await;
        let client = RemoteBus::new(addr.clone(), Duration::from_secs(2));

        let mut remote_sub = client.subscribe("t").await.unwrap();
        let mut local_sub = bus.subscribe("t").await.unwrap();
        wait_for_subscribers(&bus, "t", 2).await;

        let publisher = RemoteBus::new(addr, Duration::from_secs(2));
        publisher.publish("t", &event("make test")).await.unwrap();
        publisher.publish("t", &event("make install")).await.unwrap();

        assert_eq!(local_sub.next().await.unwrap().command, "make test");
        assert_eq!(local_sub.next().await.unwrap().command, "make install");
        assert_eq!(remote_sub.next().await.unwrap().command, "make test");
        assert_eq!(remote_sub.next().await.unwrap().command, "make install");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_connect_failure_is_bus_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RemoteBus::new(addr, Duration::from_millis(200));
        let result = client.publish("t", &event("ls")).await;
        assert!(matches!(result, Err(RecallError::Bus(_))));
    }

    #[test]
    fn test_frame_wire_format() {
        let json = serde_json::to_string(&Frame::Subscribe {
            topic: "totalrecall".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"subscribe","topic":"totalrecall"}"#);
        assert_eq!(
            serde_json::to_string(&Frame::Subscribed).unwrap(),
            r#"{"op":"subscribed"}"#
        );
    }
}
