//! TCP bridge to a pub/sub relay with persistent connection and automatic reconnection

use crate::transport::traits::{topic_matches, ConnectionState, Message, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use edge_shared::codec::{self, Frame, FrameDecoder};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const OUTBOUND_BUFFER: usize = 100;
const SUBSCRIPTION_BUFFER: usize = 64;

/// Configuration for the TCP bridge
#[derive(Debug, Clone)]
pub struct TcpBridgeConfig {
    /// Relay address
    pub address: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for TcpBridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:1883".into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct Subscription {
    filter: String,
    sender: mpsc::Sender<Message>,
}

type Subscriptions = Arc<Mutex<Vec<Subscription>>>;

/// Pub/sub transport speaking length-prefixed JSON frames to a relay
///
/// Subscriptions are replayed on every reconnect. Frames published while
/// the link is down wait in the outbound queue until it is back.
pub struct TcpBridge {
    outbound_tx: mpsc::Sender<Frame>,
    subscriptions: Subscriptions,
    state_rx: watch::Receiver<ConnectionState>,
}

impl TcpBridge {
    /// Create a new bridge and start the connection loop
    pub fn new(config: TcpBridgeConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let subscriptions: Subscriptions = Arc::new(Mutex::new(Vec::new()));

        let subs_clone = subscriptions.clone();
        tokio::spawn(async move {
            connection_loop(config, subs_clone, outbound_rx, state_tx).await;
        });

        Self {
            outbound_tx,
            subscriptions,
            state_rx,
        }
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        self.outbound_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("Outbound queue full"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("Connection closed"),
        })
    }
}

#[async_trait]
impl Transport for TcpBridge {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.enqueue(Frame::publish(topic, &payload)?)
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Message>> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        lock(&self.subscriptions).push(Subscription {
            filter: filter.to_string(),
            sender,
        });

        // Replayed on reconnect if the link is down right now
        if let Err(e) = self.enqueue(Frame::Subscribe {
            filter: filter.to_string(),
        }) {
            debug!(%filter, "Subscribe deferred: {}", e);
        }
        Ok(receiver)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

fn lock(subscriptions: &Subscriptions) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
    subscriptions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: TcpBridgeConfig,
    subscriptions: Subscriptions,
    mut outbound_rx: mpsc::Receiver<Frame>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, TcpStream::connect(&config.address)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;
                info!("Connected to relay {}", config.address);

                let result =
                    handle_connection(stream, &subscriptions, &mut outbound_rx, &state_tx).await;
                state_tx.send_replace(ConnectionState::Disconnected);

                match result {
                    Ok(()) => {
                        debug!("Bridge closed, stopping connection loop");
                        return;
                    }
                    Err(reason) => warn!("Disconnected from relay: {}", reason),
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to relay {}: {}", config.address, e);
            }
            Err(_) => {
                warn!("Timed out connecting to relay {}", config.address);
            }
        }

        if outbound_rx.is_closed() {
            return;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Handle an active connection
///
/// Returns `Ok(())` only when the bridge itself was dropped.
async fn handle_connection(
    stream: TcpStream,
    subscriptions: &Subscriptions,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    state_tx: &watch::Sender<ConnectionState>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let filters: Vec<String> = lock(subscriptions).iter().map(|s| s.filter.clone()).collect();
    for filter in filters {
        let encoded = codec::encode(&Frame::Subscribe { filter })?;
        writer.write_all(&encoded).await?;
    }
    state_tx.send_replace(ConnectionState::Connected);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    return Ok(());
                };
                let encoded = codec::encode(&frame)?;
                writer.write_all(&encoded).await?;
            }

            result = reader.read(&mut read_buf) => {
                let n = result.map_err(|e| anyhow!("Read error: {}", e))?;
                if n == 0 {
                    return Err(anyhow!("Relay closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                // Process all complete frames
                while let Some(frame) = decoder.decode_next()? {
                    route_inbound(subscriptions, frame).await;
                }
            }
        }
    }
}

/// Hand an inbound publish to every matching subscriber
///
/// Waits for room in each subscriber queue, so a slow consumer stalls the
/// read side instead of losing messages.
async fn route_inbound(subscriptions: &Subscriptions, frame: Frame) {
    let Frame::Publish { topic, payload } = frame else {
        debug!("Ignoring non-publish frame from relay");
        return;
    };

    let message = Message::new(topic, Bytes::from(payload.into_bytes()));
    let targets: Vec<mpsc::Sender<Message>> = {
        let mut subscriptions = lock(subscriptions);
        subscriptions.retain(|s| !s.sender.is_closed());
        subscriptions
            .iter()
            .filter(|s| topic_matches(&s.filter, &message.topic))
            .map(|s| s.sender.clone())
            .collect()
    };

    for target in targets {
        if target.send(message.clone()).await.is_err() {
            error!(topic = %message.topic, "Subscriber gone, message not delivered");
        }
    }
}
