//! Component lifecycle shared by every piece of the server.
//!
//! A component walks the states `New → Initialized → Starting → Started →
//! Stopping → Stopped → Destroyed` and announces each transition to its
//! registered [`LifecycleListener`]s. Start and stop are bracketed by
//! before/after events:
//!
//! - start: `before_start`, `start`, `after_start`
//! - stop: `before_stop`, `stop`, `after_stop`
//!
//! `init` and `destroy` are single events, and `periodic` is fired by the
//! background timer of containers independently of the linear progression.
//!
//! The bookkeeping lives in [`LifecycleSupport`], which components embed and
//! drive from their [`Lifecycle`] implementation.
use std::{any::Any, fmt, sync::Arc};

use serde::Serialize;

use crate::{AnyResult, Result};

pub(crate) mod support;

pub use support::{panic_message, LifecycleSupport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    New,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    Destroyed,
}

impl LifecycleState {
    pub fn is_available(&self) -> bool {
        matches!(self, LifecycleState::Started)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::New => "new",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    Init,
    BeforeStart,
    Start,
    AfterStart,
    BeforeStop,
    Stop,
    AfterStop,
    Destroy,
    Periodic,
}

impl LifecycleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::Init => "init",
            LifecycleEventType::BeforeStart => "before_start",
            LifecycleEventType::Start => "start",
            LifecycleEventType::AfterStart => "after_start",
            LifecycleEventType::BeforeStop => "before_stop",
            LifecycleEventType::Stop => "stop",
            LifecycleEventType::AfterStop => "after_stop",
            LifecycleEventType::Destroy => "destroy",
            LifecycleEventType::Periodic => "periodic",
        }
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional payload attached to an event.
pub type EventData = dyn Any + Send + Sync;

/// A single transition notification.
pub struct LifecycleEvent<'a> {
    source: &'a dyn Lifecycle,
    kind: LifecycleEventType,
    data: Option<&'a EventData>,
}

impl<'a> LifecycleEvent<'a> {
    pub fn new(
        source: &'a dyn Lifecycle,
        kind: LifecycleEventType,
        data: Option<&'a EventData>,
    ) -> Self {
        Self { source, kind, data }
    }

    /// The component performing the transition.
    pub fn source(&self) -> &'a dyn Lifecycle {
        self.source
    }

    pub fn kind(&self) -> LifecycleEventType {
        self.kind
    }

    pub fn data(&self) -> Option<&'a EventData> {
        self.data
    }

    pub fn data_as<T: 'static>(&self) -> Option<&'a T> {
        self.data.and_then(|d| d.downcast_ref::<T>())
    }
}

impl fmt::Debug for LifecycleEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("source", &self.source.component_name())
            .field("kind", &self.kind)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// Receives every transition event of the components it is registered on.
///
/// Listeners run synchronously on the thread performing the transition. An
/// error (or a panic) is logged and never aborts the transition nor the
/// notification of the remaining listeners.
pub trait LifecycleListener: Send + Sync {
    fn lifecycle_event(&self, event: &LifecycleEvent<'_>) -> AnyResult<()>;
}

pub trait Lifecycle: Send + Sync {
    /// Human readable identity used in events and logs.
    fn component_name(&self) -> String;

    fn state(&self) -> LifecycleState;

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>);

    /// Returns `false` when the listener was not registered.
    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool;

    fn find_lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>>;

    fn init(&self) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn destroy(&self) -> Result<()>;
}

pub(crate) fn same_listener(
    a: &Arc<dyn LifecycleListener>,
    b: &Arc<dyn LifecycleListener>,
) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
