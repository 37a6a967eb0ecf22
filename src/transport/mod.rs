pub mod memory;
pub mod tcp;
pub mod traits;

pub use memory::MemoryBroker;
pub use tcp::{TcpBridge, TcpBridgeConfig};
pub use traits::{ConnectionState, Transport};

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

/// Run `on_connect` now if connected, then on every reconnection
pub fn spawn_on_connect<F, Fut>(transport: &dyn Transport, on_connect: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut watcher = transport.watch_connection();
    tokio::spawn(async move {
        let mut connected = *watcher.borrow_and_update() == ConnectionState::Connected;
        if connected {
            on_connect().await;
        }

        while watcher.changed().await.is_ok() {
            let now = *watcher.borrow_and_update() == ConnectionState::Connected;
            if now && !connected {
                on_connect().await;
            }
            connected = now;
        }
        debug!("Connection watcher closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_on_connect_runs_initially_and_on_reconnect() {
        let broker = MemoryBroker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _watcher = spawn_on_connect(&broker, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        broker.set_connection_state(ConnectionState::Disconnected);
        tokio::task::yield_now().await;
        broker.set_connection_state(ConnectionState::Connected);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
