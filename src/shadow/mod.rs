pub mod device;
pub mod reconciler;
pub mod store;
pub mod throttle;

pub use device::{DeviceInfo, ShadowPublisher, ShadowTopics};
pub use reconciler::ShadowReconciler;
pub use store::ShadowStore;
pub use throttle::UpdateThrottler;
