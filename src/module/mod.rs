pub mod inventory;
pub mod runtime;

pub use inventory::spawn_observer;
pub use runtime::{InMemoryRuntime, ModuleRuntime, RuntimeError};
