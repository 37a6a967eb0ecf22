//! Keeps the reported module inventory in step with the runtime

use super::runtime::ModuleRuntime;
use crate::shadow::ShadowReconciler;
use edge_shared::{ModuleInfo, ModuleState};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Publish an initial inventory, then refresh it on every lifecycle event
pub fn spawn_observer(
    runtime: Arc<dyn ModuleRuntime>,
    reconciler: Arc<ShadowReconciler>,
) -> JoinHandle<()> {
    let mut events = runtime.subscribe_events();

    tokio::spawn(async move {
        refresh(runtime.as_ref(), &reconciler).await;

        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(module = %event.module, kind = ?event.kind, "Module event");
                    refresh(runtime.as_ref(), &reconciler).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} module events, refreshing inventory", skipped);
                    refresh(runtime.as_ref(), &reconciler).await;
                }
                Err(RecvError::Closed) => {
                    debug!("Module event feed closed");
                    break;
                }
            }
        }
    })
}

async fn refresh(runtime: &dyn ModuleRuntime, reconciler: &ShadowReconciler) {
    match runtime.list_modules().await {
        Ok(modules) => reconciler.update_module_list(visible(modules)),
        Err(e) => error!("Failed to list modules: {}", e),
    }
}

/// Uninstalled modules are left out of the reported inventory
fn visible(modules: Vec<ModuleInfo>) -> Vec<ModuleInfo> {
    modules
        .into_iter()
        .filter(|m| m.state != ModuleState::Uninstalled)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::InMemoryRuntime;
    use crate::shadow::{ShadowStore, UpdateThrottler};
    use crate::task::ExecutionEngine;
    use crate::testing::RecordingPublisher;
    use edge_shared::ModuleRef;
    use std::time::Duration;

    #[tokio::test]
    async fn test_inventory_follows_lifecycle_events() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let module = runtime.register(ModuleRef::new("m", "1.0.0"), ModuleState::Resolved);

        let store = Arc::new(ShadowStore::new());
        let publisher = Arc::new(RecordingPublisher::for_store(store.clone()));
        let throttler = Arc::new(UpdateThrottler::new(publisher, Duration::from_millis(1000)));
        let engine = Arc::new(ExecutionEngine::new(vec![], "1.0"));
        let reconciler = Arc::new(ShadowReconciler::new(store.clone(), engine, throttler));

        let _observer = spawn_observer(runtime.clone(), reconciler);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            store.reported().modules.unwrap()[0].state,
            ModuleState::Resolved
        );

        runtime.start(module.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.reported().modules.unwrap()[0].state, ModuleState::Active);

        runtime.uninstall(module.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.reported().modules.unwrap().is_empty());
    }
}
