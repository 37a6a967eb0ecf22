//! Signed artifact URLs requested over the transport
//!
//! The signer keeps a single outstanding request. Issuing a new request
//! while one is unresolved supersedes it: the earlier waiter fails with
//! [`SignerError::Superseded`] right away instead of waiting out the
//! caller's sign timeout, so a deploy that loses the slot errors sooner
//! than one whose request is simply abandoned. Job processing is
//! single-flight so jobs never race here, but deploys arriving through
//! shadow deltas are not serialized the same way.

use crate::transport::Transport;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use edge_shared::{AccelerationInfo, ModuleRef};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const REQUEST_SUFFIX: &str = "/pre-signed-url/request";
const RESPONSE_SUFFIX: &str = "/pre-signed-url/response";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Signing request superseded by a newer one")]
    Superseded,

    #[error("Failed to publish signing request: {0}")]
    Publish(String),

    #[error("Malformed signing response: {0}")]
    Malformed(String),

    #[error("Signer stopped")]
    Closed,
}

/// Produces time-limited download URLs for module artifacts
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn request_signed_url(
        &self,
        module: &ModuleRef,
        acceleration: Option<&AccelerationInfo>,
    ) -> Result<String, SignerError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUrlRequest<'a> {
    symbolic_name: &'a str,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    multicore: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    abi_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUrlResponse {
    signed_url: String,
}

type Waiter = oneshot::Sender<Result<String, SignerError>>;

/// Signer that talks to the backend over `<prefix>/pre-signed-url/*`
pub struct TopicUrlSigner {
    transport: Arc<dyn Transport>,
    request_topic: String,
    response_topic: String,
    pending: Mutex<Option<Waiter>>,
}

impl TopicUrlSigner {
    pub fn new(transport: Arc<dyn Transport>, prefix: &str) -> Self {
        Self {
            transport,
            request_topic: format!("{}{}", prefix, REQUEST_SUFFIX),
            response_topic: format!("{}{}", prefix, RESPONSE_SUFFIX),
            pending: Mutex::new(None),
        }
    }

    /// Subscribe to responses and spawn the listener loop
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut responses = self.transport.subscribe(&self.response_topic).await?;
        let signer = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(message) = responses.recv().await {
                signer.on_response(&message.payload);
            }
            debug!("Signing response stream closed");
        }))
    }

    /// Complete the outstanding request from a response payload
    pub fn on_response(&self, payload: &[u8]) {
        let Some(waiter) = self.take_pending() else {
            warn!("Signed URL response with no request waiting");
            return;
        };

        let result = serde_json::from_slice::<SignUrlResponse>(payload)
            .map(|r| r.signed_url)
            .map_err(|e| {
                error!("Failed to parse pre-signed url response: {}", e);
                SignerError::Malformed(e.to_string())
            });
        let _ = waiter.send(result);
    }

    fn take_pending(&self) -> Option<Waiter> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn replace_pending(&self, waiter: Waiter) -> Option<Waiter> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(waiter)
    }
}

#[async_trait]
impl UrlSigner for TopicUrlSigner {
    async fn request_signed_url(
        &self,
        module: &ModuleRef,
        acceleration: Option<&AccelerationInfo>,
    ) -> Result<String, SignerError> {
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.replace_pending(tx) {
            debug!("Superseding unresolved signing request");
            let _ = previous.send(Err(SignerError::Superseded));
        }

        let request = SignUrlRequest {
            symbolic_name: &module.symbolic_name,
            version: &module.version,
            multicore: acceleration.and_then(|a| a.multicore),
            target: acceleration.and_then(|a| a.target.as_deref()),
            abi_number: acceleration.and_then(|a| a.abi_number),
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| SignerError::Publish(e.to_string()))?;

        debug!(%module, "Requesting pre-signed url");
        if let Err(e) = self
            .transport
            .publish(&self.request_topic, Bytes::from(payload))
            .await
        {
            let _ = self.take_pending();
            return Err(SignerError::Publish(e.to_string()));
        }

        rx.await.unwrap_or(Err(SignerError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use serde_json::{json, Value};

    fn signer_on(broker: &Arc<MemoryBroker>) -> Arc<TopicUrlSigner> {
        Arc::new(TopicUrlSigner::new(broker.clone(), "edp/edge-001"))
    }

    #[tokio::test]
    async fn test_request_is_published_and_completed() {
        let broker = Arc::new(MemoryBroker::new());
        let mut requests = broker.subscribe("edp/edge-001/pre-signed-url/request").await.unwrap();
        let signer = signer_on(&broker);
        let _listener = signer.start().await.unwrap();

        let accel = AccelerationInfo {
            target: Some("linux_x86_64".into()),
            multicore: Some(true),
            abi_number: Some(3),
        };
        let module = ModuleRef::new("m", "1.0.0");
        let waiting = {
            let signer = signer.clone();
            tokio::spawn(async move { signer.request_signed_url(&module, Some(&accel)).await })
        };

        let request = requests.recv().await.unwrap();
        let body: Value = serde_json::from_slice(&request.payload).unwrap();
        assert_eq!(
            body,
            json!({"symbolicName": "m", "version": "1.0.0", "multicore": true, "target": "linux_x86_64", "abiNumber": 3})
        );

        broker
            .publish(
                "edp/edge-001/pre-signed-url/response",
                Bytes::from_static(br#"{"signedUrl":"https://bucket/m.jar?sig=1"}"#),
            )
            .await
            .unwrap();

        assert_eq!(waiting.await.unwrap(), Ok("https://bucket/m.jar?sig=1".to_string()));
    }

    #[tokio::test]
    async fn test_new_request_supersedes_unresolved_one() {
        let broker = Arc::new(MemoryBroker::new());
        let signer = signer_on(&broker);

        let first = {
            let signer = signer.clone();
            tokio::spawn(async move {
                signer
                    .request_signed_url(&ModuleRef::new("a", "1.0.0"), None)
                    .await
            })
        };
        tokio::task::yield_now().await;

        let second = {
            let signer = signer.clone();
            tokio::spawn(async move {
                signer
                    .request_signed_url(&ModuleRef::new("b", "1.0.0"), None)
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Fails well before any sign timeout would
        let first = tokio::time::timeout(std::time::Duration::from_secs(1), first)
            .await
            .expect("superseded waiter still pending");
        assert_eq!(first.unwrap(), Err(SignerError::Superseded));

        signer.on_response(br#"{"signedUrl":"https://bucket/b.jar"}"#);
        assert_eq!(second.await.unwrap(), Ok("https://bucket/b.jar".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_response_fails_waiter() {
        let broker = Arc::new(MemoryBroker::new());
        let signer = signer_on(&broker);

        let waiting = {
            let signer = signer.clone();
            tokio::spawn(async move {
                signer
                    .request_signed_url(&ModuleRef::new("a", "1.0.0"), None)
                    .await
            })
        };
        tokio::task::yield_now().await;

        signer.on_response(b"not json");
        assert!(matches!(waiting.await.unwrap(), Err(SignerError::Malformed(_))));
    }
}
