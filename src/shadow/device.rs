//! Binding of the shadow to the transport

use super::reconciler::ShadowReconciler;
use super::store::ShadowStore;
use super::throttle::StatePublisher;
use crate::transport::{spawn_on_connect, Transport};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use edge_shared::shadow::Reported;
use edge_shared::{AccelerationInfo, Desired, ReportedUpdate, Shadow};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shadow topics for a thing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    pub update: String,
    pub delta: String,
    pub get: String,
    pub get_accepted: String,
    pub get_rejected: String,
}

impl ShadowTopics {
    pub fn new(thing_name: &str) -> Self {
        let base = format!("$aws/things/{}/shadow", thing_name);
        Self {
            update: format!("{}/update", base),
            delta: format!("{}/update/delta", base),
            get: format!("{}/get", base),
            get_accepted: format!("{}/get/accepted", base),
            get_rejected: format!("{}/get/rejected", base),
        }
    }
}

/// Static description of the device, reported once at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub arch: String,
    pub os_name: String,
    pub os_version: String,
    pub runtime_name: String,
    pub runtime_version: String,
    pub acceleration: Option<AccelerationInfo>,
}

impl DeviceInfo {
    /// Describe the host this agent runs on
    pub fn detect(acceleration: Option<AccelerationInfo>) -> Self {
        let os_version = std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            arch: std::env::consts::ARCH.to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version,
            runtime_name: env!("CARGO_PKG_NAME").to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            acceleration,
        }
    }

    pub fn apply(&self, reported: &mut Reported) {
        reported.arch = Some(self.arch.clone());
        reported.os_name = Some(self.os_name.clone());
        reported.os_version = Some(self.os_version.clone());
        reported.runtime_name = Some(self.runtime_name.clone());
        reported.runtime_version = Some(self.runtime_version.clone());
        reported.acceleration_info = self.acceleration.as_ref().map(ToString::to_string);
    }
}

/// Publishes the local reported state as a shadow update
pub struct ShadowPublisher {
    store: Arc<ShadowStore>,
    transport: Arc<dyn Transport>,
    topic: String,
}

impl ShadowPublisher {
    pub fn new(store: Arc<ShadowStore>, transport: Arc<dyn Transport>, topics: &ShadowTopics) -> Self {
        Self {
            store,
            transport,
            topic: topics.update.clone(),
        }
    }
}

#[async_trait]
impl StatePublisher for ShadowPublisher {
    async fn publish_state(&self) {
        let update = ReportedUpdate::new(self.store.reported());
        let payload = match update.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize shadow update message: {}", e);
                return;
            }
        };

        debug!(topic = %self.topic, size = payload.len(), "Updating shadow");
        if let Err(e) = self.transport.publish(&self.topic, Bytes::from(payload)).await {
            error!("Failed to update device shadow: {}", e);
        }
    }
}

/// Subscribe the reconciler to the shadow topics and spawn the listener loops
///
/// The cloud shadow is requested on every (re)connection.
pub async fn start(
    reconciler: Arc<ShadowReconciler>,
    transport: Arc<dyn Transport>,
    topics: ShadowTopics,
) -> Result<Vec<JoinHandle<()>>> {
    let mut deltas = transport.subscribe(&topics.delta).await?;
    let mut documents = transport.subscribe(&topics.get_accepted).await?;
    let mut rejections = transport.subscribe(&topics.get_rejected).await?;

    let delta_reconciler = reconciler.clone();
    let delta_loop = tokio::spawn(async move {
        while let Some(message) = deltas.recv().await {
            debug!("Shadow delta received ({} bytes)", message.payload.len());
            match Desired::from_delta(&message.payload) {
                Ok(desired) => delta_reconciler.on_delta(desired),
                Err(e) => error!("Failed to deserialize shadow update message: {}", e),
            }
        }
        warn!("Shadow delta stream closed");
    });

    let document_loop = tokio::spawn(async move {
        while let Some(message) = documents.recv().await {
            match Shadow::parse(&message.payload) {
                Ok(shadow) => reconciler.on_cloud_document(shadow),
                Err(e) => error!("Failed to parse get Shadow response: {}", e),
            }
        }
        warn!("Shadow document stream closed");
    });

    let rejection_loop = tokio::spawn(async move {
        while let Some(message) = rejections.recv().await {
            warn!(
                "Cloud shadow request rejected: {}",
                String::from_utf8_lossy(&message.payload)
            );
        }
    });

    let get_topic = topics.get.clone();
    let requester = transport.clone();
    let request_loop = spawn_on_connect(transport.as_ref(), move || {
        let transport = requester.clone();
        let topic = get_topic.clone();
        async move {
            info!("Requesting cloud shadow");
            if let Err(e) = transport.publish(&topic, Bytes::from_static(b"{}")).await {
                error!("Failed to send get Shadow request: {}", e);
            }
        }
    });

    Ok(vec![delta_loop, document_loop, rejection_loop, request_loop])
}
