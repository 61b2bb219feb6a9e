//! Server side of peer-to-peer calls: the authoritative call lifecycle, the
//! signaling relay between the two parties, and the axum surface exposing both.

use std::sync::Arc;

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod pubsub;
pub mod relay;
pub mod router;
pub mod store;
pub mod sweeper;

pub use config::Config;
pub use error::{CallError, SignalingError, StoreError};
pub use lifecycle::LifecycleManager;
pub use membership::{Membership, StaticMembership};
pub use pubsub::{PubSub, Topic};
pub use relay::SignalingRelay;
pub use router::ServerState;
pub use store::{CallStore, MemoryCallStore};

impl ServerState {
    /// Wire the lifecycle manager and relay to one shared store and hub.
    pub fn new(
        store: Arc<dyn CallStore>,
        membership: Arc<dyn Membership>,
        strict_missed: bool,
    ) -> Self {
        let hub = PubSub::new();
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&store),
            membership,
            hub.clone(),
        ));
        let relay = SignalingRelay::new(hub.clone(), store);
        Self {
            lifecycle,
            relay,
            hub,
            strict_missed,
        }
    }
}
