//! Simulation store: live mirror, writes and subscriptions.

/// Store operations and the mirrored snapshot type.
pub mod simulation;
/// Channel-backed subscriber handle.
pub mod stream;
/// Subscriber registry and subscription handles.
pub mod subscribers;

pub use simulation::{SimulationStore, Snapshot};
pub use stream::SnapshotStream;
pub use subscribers::{SubscriberRegistry, Subscription, SubscriptionId};
