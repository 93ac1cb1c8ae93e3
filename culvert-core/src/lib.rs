#[macro_use]
mod error;
pub use error::{AnyError, AnyResult, Error, Result};

pub mod config;
pub mod container;
pub mod context;
pub mod endpoint;
pub mod lifecycle;
pub mod registry;
pub mod service;

pub use container::{Container, Exchange, Outcome, Pipeline, Tier, Valve};
pub use context::ServerContext;
pub use endpoint::{Connection, ConnectionHandler, Endpoint, Executor, StandardExecutor};
pub use lifecycle::{
    Lifecycle, LifecycleEvent, LifecycleEventType, LifecycleListener, LifecycleState,
};
pub use registry::ComponentRegistry;
pub use service::Service;

#[cfg(test)]
pub(crate) mod test_util;
