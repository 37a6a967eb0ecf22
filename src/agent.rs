//! Component wiring
//!
//! Builds the agent from its configuration: transport, signer and fetcher,
//! execution engine, shadow reconciler with its throttled publisher, module
//! inventory observer and job orchestrator.

use crate::artifact::{HttpFetcher, TopicUrlSigner};
use crate::config::{AgentConfig, TransportConfig, TransportMode};
use crate::job::JobOrchestrator;
use crate::module::{self, ModuleRuntime};
use crate::shadow::{self, DeviceInfo, ShadowPublisher, ShadowReconciler, ShadowStore, ShadowTopics, UpdateThrottler};
use crate::task::{default_handlers, ExecutionEngine, HandlerContext};
use crate::transport::{MemoryBroker, TcpBridge, TcpBridgeConfig, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub fn build_transport(config: &TransportConfig) -> Arc<dyn Transport> {
    match config.mode {
        TransportMode::Memory => Arc::new(MemoryBroker::new()),
        TransportMode::Tcp => Arc::new(TcpBridge::new(TcpBridgeConfig {
            address: config.relay_address.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        })),
    }
}

/// Running agent
pub struct Agent {
    engine: Arc<ExecutionEngine>,
    throttler: Arc<UpdateThrottler>,
    reconciler: Arc<ShadowReconciler>,
    _jobs: Arc<JobOrchestrator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub async fn start(
        config: &AgentConfig,
        transport: Arc<dyn Transport>,
        runtime: Arc<dyn ModuleRuntime>,
    ) -> Result<Self> {
        let thing_name = config.identity.thing_name.as_str();
        info!("Edge agent starting: {}", thing_name);
        info!("  Transport: {}", transport.name());

        let mut tasks = Vec::new();

        let signer = Arc::new(TopicUrlSigner::new(transport.clone(), &config.identity.topic_prefix));
        tasks.push(signer.start().await.context("starting URL signer")?);
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout()).context("building HTTP client")?);

        let ctx = HandlerContext {
            runtime: runtime.clone(),
            signer,
            fetcher,
            acceleration: config.device.acceleration.clone(),
            sign_timeout: config.sign_timeout(),
        };
        let engine = Arc::new(ExecutionEngine::new(
            default_handlers(&ctx),
            config.engine.supported_api_version.clone(),
        ));

        let topics = ShadowTopics::new(thing_name);
        let store = Arc::new(ShadowStore::new());
        let publisher = Arc::new(ShadowPublisher::new(store.clone(), transport.clone(), &topics));
        let throttler = Arc::new(UpdateThrottler::new(publisher, config.shadow_update_interval()));
        let reconciler = Arc::new(ShadowReconciler::new(store, engine.clone(), throttler.clone()));

        reconciler.populate_device_info(&DeviceInfo::detect(config.device.acceleration.clone()));
        reconciler.set_online();

        tasks.extend(
            shadow::device::start(reconciler.clone(), transport.clone(), topics)
                .await
                .context("subscribing to shadow topics")?,
        );
        tasks.push(module::spawn_observer(runtime, reconciler.clone()));

        let jobs = Arc::new(JobOrchestrator::new(engine.clone(), transport, thing_name));
        tasks.extend(jobs.start().await.context("subscribing to job topics")?);

        info!("Edge agent running");
        Ok(Self {
            engine,
            throttler,
            reconciler,
            _jobs: jobs,
            tasks,
        })
    }

    /// Report offline and stop every loop
    pub async fn shutdown(self) {
        info!("Edge agent shutting down");
        self.reconciler.set_offline().await;
        self.throttler.shutdown();
        self.engine.shutdown();
        for task in self.tasks {
            task.abort();
        }
    }
}
