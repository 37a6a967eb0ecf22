//! Module runtime boundary and an in-memory implementation

use async_trait::async_trait;
use bytes::Bytes;
use edge_shared::{ModuleEventKind, ModuleInfo, ModuleRef, ModuleState};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;

/// Errors reported by a module runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Module {0} not found")]
    NotFound(u64),

    #[error("Module {0} is already installed")]
    AlreadyInstalled(ModuleRef),

    #[error("Module {0} is uninstalled")]
    Uninstalled(u64),

    #[error("Invalid artifact for {module}: {reason}")]
    InvalidArtifact { module: ModuleRef, reason: String },

    #[error("Configuration is not supported by this runtime")]
    ConfigurationUnsupported,

    #[error("{0}")]
    Other(String),
}

/// A lifecycle change in the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEvent {
    pub kind: ModuleEventKind,
    pub module: ModuleInfo,
}

/// Install/start/stop mechanics for deployable modules
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// All modules known to the runtime, including uninstalled ones
    async fn list_modules(&self) -> Result<Vec<ModuleInfo>, RuntimeError>;

    async fn start(&self, module_id: u64) -> Result<(), RuntimeError>;

    async fn stop(&self, module_id: u64) -> Result<(), RuntimeError>;

    async fn uninstall(&self, module_id: u64) -> Result<(), RuntimeError>;

    /// Install a module from an artifact fetched from `location`
    async fn install_from_stream(
        &self,
        location: &str,
        module: &ModuleRef,
        artifact: Bytes,
    ) -> Result<ModuleInfo, RuntimeError>;

    /// Apply configuration properties, returning the effective set
    async fn update_configuration(
        &self,
        pid: &str,
        location: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, RuntimeError>;

    /// Lifecycle event feed
    fn subscribe_events(&self) -> broadcast::Receiver<ModuleEvent>;
}

struct Inventory {
    modules: BTreeMap<u64, ModuleInfo>,
    configurations: BTreeMap<String, BTreeMap<String, Value>>,
    next_id: u64,
}

/// Runtime that keeps module state in memory
///
/// Installing resolves immediately. Starting and stopping pass through the
/// transient states so observers see the full event sequence.
pub struct InMemoryRuntime {
    inventory: Mutex<Inventory>,
    events: broadcast::Sender<ModuleEvent>,
    supports_configuration: bool,
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inventory: Mutex::new(Inventory {
                modules: BTreeMap::new(),
                configurations: BTreeMap::new(),
                next_id: 1,
            }),
            events,
            supports_configuration: true,
        }
    }

    /// A runtime without a configuration facility
    pub fn without_configuration() -> Self {
        Self {
            supports_configuration: false,
            ..Self::new()
        }
    }

    /// Register a module in the given state without emitting events
    pub fn register(&self, module: ModuleRef, state: ModuleState) -> ModuleInfo {
        let mut inventory = self.lock();
        let info = ModuleInfo {
            id: inventory.next_id,
            symbolic_name: module.symbolic_name,
            version: module.version,
            state,
        };
        inventory.next_id += 1;
        inventory.modules.insert(info.id, info.clone());
        info
    }

    /// Stored configuration for a pid
    pub fn configuration(&self, pid: &str) -> Option<BTreeMap<String, Value>> {
        self.lock().configurations.get(pid).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.inventory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move a module through `steps`, emitting one event per step
    fn transition(
        &self,
        module_id: u64,
        steps: &[(ModuleState, ModuleEventKind)],
    ) -> Result<(), RuntimeError> {
        let mut emitted = Vec::with_capacity(steps.len());
        {
            let mut inventory = self.lock();
            let module = inventory
                .modules
                .get_mut(&module_id)
                .ok_or(RuntimeError::NotFound(module_id))?;
            for (state, kind) in steps {
                module.state = *state;
                emitted.push(ModuleEvent {
                    kind: *kind,
                    module: module.clone(),
                });
            }
        }

        for event in emitted {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn state_of(&self, module_id: u64) -> Result<ModuleState, RuntimeError> {
        self.lock()
            .modules
            .get(&module_id)
            .map(|m| m.state)
            .ok_or(RuntimeError::NotFound(module_id))
    }
}

#[async_trait]
impl ModuleRuntime for InMemoryRuntime {
    async fn list_modules(&self) -> Result<Vec<ModuleInfo>, RuntimeError> {
        Ok(self.lock().modules.values().cloned().collect())
    }

    async fn start(&self, module_id: u64) -> Result<(), RuntimeError> {
        match self.state_of(module_id)? {
            ModuleState::Active => Ok(()),
            ModuleState::Uninstalled => Err(RuntimeError::Uninstalled(module_id)),
            _ => self.transition(
                module_id,
                &[
                    (ModuleState::Starting, ModuleEventKind::Starting),
                    (ModuleState::Active, ModuleEventKind::Started),
                ],
            ),
        }
    }

    async fn stop(&self, module_id: u64) -> Result<(), RuntimeError> {
        match self.state_of(module_id)? {
            ModuleState::Active | ModuleState::Starting => self.transition(
                module_id,
                &[
                    (ModuleState::Stopping, ModuleEventKind::Stopping),
                    (ModuleState::Resolved, ModuleEventKind::Stopped),
                ],
            ),
            ModuleState::Uninstalled => Err(RuntimeError::Uninstalled(module_id)),
            _ => Ok(()),
        }
    }

    async fn uninstall(&self, module_id: u64) -> Result<(), RuntimeError> {
        match self.state_of(module_id)? {
            ModuleState::Uninstalled => Err(RuntimeError::Uninstalled(module_id)),
            ModuleState::Active => self.transition(
                module_id,
                &[
                    (ModuleState::Stopping, ModuleEventKind::Stopping),
                    (ModuleState::Resolved, ModuleEventKind::Stopped),
                    (ModuleState::Installed, ModuleEventKind::Unresolved),
                    (ModuleState::Uninstalled, ModuleEventKind::Uninstalled),
                ],
            ),
            _ => self.transition(
                module_id,
                &[(ModuleState::Uninstalled, ModuleEventKind::Uninstalled)],
            ),
        }
    }

    async fn install_from_stream(
        &self,
        location: &str,
        module: &ModuleRef,
        artifact: Bytes,
    ) -> Result<ModuleInfo, RuntimeError> {
        if artifact.is_empty() {
            return Err(RuntimeError::InvalidArtifact {
                module: module.clone(),
                reason: "empty artifact".into(),
            });
        }

        let installed = self
            .lock()
            .modules
            .values()
            .any(|m| m.matches(module) && m.state != ModuleState::Uninstalled);
        if installed {
            return Err(RuntimeError::AlreadyInstalled(module.clone()));
        }

        let info = self.register(module.clone(), ModuleState::Installed);
        debug!(%module, %location, size = artifact.len(), "Installing module");
        self.transition(
            info.id,
            &[
                (ModuleState::Installed, ModuleEventKind::Installed),
                (ModuleState::Resolved, ModuleEventKind::Resolved),
            ],
        )?;
        info!(%module, id = info.id, "Module installed");

        Ok(ModuleInfo {
            state: ModuleState::Resolved,
            ..info
        })
    }

    async fn update_configuration(
        &self,
        pid: &str,
        location: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, RuntimeError> {
        if !self.supports_configuration {
            return Err(RuntimeError::ConfigurationUnsupported);
        }

        debug!(%pid, %location, "Updating configuration");
        let mut inventory = self.lock();
        let stored = inventory.configurations.entry(pid.to_string()).or_default();
        stored.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(stored.clone())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }
}
