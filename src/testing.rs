//! Fakes and builders shared by the unit tests

use crate::artifact::{ArtifactFetcher, FetchError, SignerError, UrlSigner};
use crate::shadow::throttle::StatePublisher;
use crate::shadow::ShadowStore;
use crate::task::handlers::TaskHandler;
use crate::transport::traits::Message;
use crate::transport::{ConnectionState, MemoryBroker, Transport};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use edge_shared::task::{LaunchTask, ModuleActionTask};
use edge_shared::{
    AccelerationInfo, Command, CommandKind, CommandResult, Desired, ModuleAction, ModuleRef,
    Reported, ResultDetail, TaskType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub fn list_command(id: &str) -> Command {
    Command::new(
        id,
        CommandKind::ModuleAction(ModuleActionTask {
            symbolic_name: None,
            version: None,
            action: ModuleAction::List,
        }),
    )
}

pub fn launch_command(id: &str) -> Command {
    Command::new(
        id,
        CommandKind::Launch(LaunchTask {
            symbolic_name: "app".into(),
            version: "1.0.0".into(),
        }),
    )
}

/// Desired state holding a LIST command per id
pub fn desired_with(ids: &[&str]) -> Desired {
    Desired {
        tasks: ids
            .iter()
            .map(|id| (id.to_string(), list_command(id)))
            .collect(),
    }
}

/// Poll the store until a result for `task_id` is recorded
pub async fn wait_for_result(store: &Arc<ShadowStore>, task_id: &str) -> CommandResult {
    for _ in 0..1000 {
        if let Some(Some(result)) = store.reported().task_results.get(task_id) {
            return result.clone();
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("no result recorded for {}", task_id);
}

type Script = dyn Fn(&Command) -> Result<CommandResult> + Send + Sync;

/// Module-action handler that answers from a closure and records calls
pub struct ScriptedHandler {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    pub fn with<F>(script: F) -> Self
    where
        F: Fn(&Command) -> Result<CommandResult> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(|command| {
            Ok(CommandResult::succeeded(
                &command.id,
                ResultDetail::ModuleAction { modules: None },
            ))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Ids of executed commands, in call order
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    /// Highest number of overlapping executions seen
    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ModuleAction
    }

    fn is_valid(&self, _command: &Command) -> bool {
        true
    }

    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push(command.id.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.script)(command)
    }
}

/// Publisher recording when it ran and, optionally, what it would send
#[derive(Default)]
pub struct RecordingPublisher {
    store: Option<Arc<ShadowStore>>,
    publishes: Mutex<Vec<Instant>>,
    reported: Mutex<Vec<Reported>>,
}

impl RecordingPublisher {
    pub fn for_store(store: Arc<ShadowStore>) -> Self {
        Self {
            store: Some(store),
            ..Default::default()
        }
    }

    pub fn publishes(&self) -> Vec<Instant> {
        self.publishes.lock().unwrap().clone()
    }

    /// Reported snapshots, one per publish
    pub fn reported(&self) -> Vec<Reported> {
        self.reported.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish_state(&self) {
        self.publishes.lock().unwrap().push(Instant::now());
        if let Some(store) = &self.store {
            self.reported.lock().unwrap().push(store.reported());
        }
    }
}

/// Memory broker that keeps a log of everything published through it
#[derive(Default)]
pub struct RecordingTransport {
    broker: MemoryBroker,
    log: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound message without logging it
    pub async fn inject(&self, topic: &str, payload: &str) {
        self.broker
            .deliver(Message::new(topic, Bytes::copy_from_slice(payload.as_bytes())))
            .await;
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.log.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Bytes> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));
        self.broker.publish(topic, payload).await
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Message>> {
        self.broker.subscribe(filter).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.broker.connection_state()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.broker.watch_connection()
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}

/// Signer answering with a fixed URL per module
#[derive(Default)]
pub struct StubSigner {
    silent: bool,
}

impl StubSigner {
    pub fn never_answers() -> Self {
        Self { silent: true }
    }
}

#[async_trait]
impl UrlSigner for StubSigner {
    async fn request_signed_url(
        &self,
        module: &ModuleRef,
        _acceleration: Option<&AccelerationInfo>,
    ) -> Result<String, SignerError> {
        if self.silent {
            std::future::pending::<()>().await;
        }
        Ok(format!(
            "https://artifacts.local/{}/{}",
            module.symbolic_name, module.version
        ))
    }
}

/// Fetcher returning canned bytes, failing for one module name
#[derive(Default)]
pub struct StubFetcher {
    failing: Option<String>,
}

impl StubFetcher {
    pub fn failing_for(name: &str) -> Self {
        Self {
            failing: Some(format!("/{}/", name)),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        match &self.failing {
            Some(marker) if url.contains(marker.as_str()) => {
                Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND))
            }
            _ => Ok(Bytes::from_static(b"artifact-bytes")),
        }
    }
}
