//! In-process broker for single-host deployments and tests

use crate::transport::traits::{topic_matches, ConnectionState, Message, Transport};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::trace;

const SUBSCRIPTION_BUFFER: usize = 64;

struct Subscription {
    filter: String,
    sender: mpsc::Sender<Message>,
}

/// Broker that routes publishes to local subscribers
pub struct MemoryBroker {
    subscriptions: Mutex<Vec<Subscription>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            subscriptions: Mutex::new(Vec::new()),
            state_tx,
        }
    }

    /// Simulate a link change, notifying connection watchers
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Deliver a message to matching subscribers
    pub async fn deliver(&self, message: Message) {
        let targets: Vec<mpsc::Sender<Message>> = {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscriptions.retain(|s| !s.sender.is_closed());
            subscriptions
                .iter()
                .filter(|s| topic_matches(&s.filter, &message.topic))
                .map(|s| s.sender.clone())
                .collect()
        };

        trace!(topic = %message.topic, subscribers = targets.len(), "Routing message");
        for target in targets {
            // A subscriber that went away is pruned on the next delivery
            let _ = target.send(message.clone()).await;
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.deliver(Message::new(topic, payload)).await;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Message>> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscription {
                filter: filter.to_string(),
                sender,
            });
        Ok(receiver)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
