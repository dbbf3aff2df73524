//! Flag server: connection supervisor plus one session per client.

pub mod listener;
pub mod session;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::store::flags::FlagStore;
use crate::store::subscriptions::SubscriptionRegistry;

/// State shared by every server session.
#[derive(Debug)]
pub struct ServerState {
    /// Server configuration.
    pub config: Arc<GlobalConfig>,
    /// Flag values.
    pub flags: Arc<FlagStore>,
    /// Change-notification subscriptions.
    pub subscriptions: Arc<SubscriptionRegistry>,
}

impl ServerState {
    /// Build state with an empty store and registry.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config: Arc::new(config),
            flags: Arc::new(FlagStore::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }
}
