//! Collaborators a container may carry or inherit from its ancestors.
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

/// Source of application code for a context.
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    fn background_process(&self) {}
}

/// Sink for container-scoped log lines.
pub trait Logger: Send + Sync {
    fn name(&self) -> &str;

    fn log(&self, container: &str, message: &str);

    fn background_process(&self) {}
}

/// Session store.
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    fn background_process(&self) {}
}

/// Security realm.
pub trait Realm: Send + Sync {
    fn name(&self) -> &str;

    fn authenticate(&self, username: &str, credentials: &str) -> bool;

    fn background_process(&self) {}
}

/// Writes container log lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn name(&self) -> &str {
        "tracing"
    }

    fn log(&self, container: &str, message: &str) {
        info!(container, "{message}");
    }
}

#[derive(Default)]
pub(crate) struct Associations {
    pub(crate) loader: RwLock<Option<Arc<dyn Loader>>>,
    pub(crate) logger: RwLock<Option<Arc<dyn Logger>>>,
    pub(crate) manager: RwLock<Option<Arc<dyn Manager>>>,
    pub(crate) realm: RwLock<Option<Arc<dyn Realm>>>,
}

impl Associations {
    /// Maintenance of the locally set collaborators only; inherited ones
    /// are handled by the container that owns them.
    pub(crate) fn background_process(&self) {
        if let Some(loader) = self.loader.read().clone() {
            loader.background_process();
        }
        if let Some(logger) = self.logger.read().clone() {
            logger.background_process();
        }
        if let Some(manager) = self.manager.read().clone() {
            manager.background_process();
        }
        if let Some(realm) = self.realm.read().clone() {
            realm.background_process();
        }
    }
}
