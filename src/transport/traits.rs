//! Transport trait abstraction for pluggable pub/sub backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Link state as seen by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Publish/subscribe transport used by the agent
///
/// Publishing is fire-and-forget: an `Ok` only means the message was handed
/// to the transport. Retry and reconnection belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to topics matching an MQTT-style filter (`+`, `#`)
    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Message>>;

    /// Current link state
    fn connection_state(&self) -> ConnectionState;

    /// Watch link state changes
    fn watch_connection(&self) -> watch::Receiver<ConnectionState>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Check whether a topic matches an MQTT-style filter
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including none) and must be last.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_single_level_wildcard() {
        let filter = "$aws/things/edge-001/jobs/+/get/accepted";
        assert!(topic_matches(filter, "$aws/things/edge-001/jobs/job-7/get/accepted"));
        assert!(!topic_matches(filter, "$aws/things/edge-001/jobs/$next/get/rejected"));
        assert!(topic_matches("$aws/things/edge-001/jobs/+/+/rejected", "$aws/things/edge-001/jobs/job-7/update/rejected"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(!topic_matches("a/#", "b/c"));
        assert!(!topic_matches("a/#/c", "a/b/c"));
    }
}
