use std::{panic::AssertUnwindSafe, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, warn};

use super::{
    same_listener, EventData, Lifecycle, LifecycleEvent, LifecycleEventType, LifecycleListener,
    LifecycleState,
};
use crate::{Error, Result};

/// State record and listener registry embedded in every lifecycle component.
///
/// Listener mutation is copy-on-write: firing loads one snapshot of the list
/// and is never affected by a concurrent add or remove. Transitions of one
/// component are serialized by a re-entrant lock, so a listener that calls
/// back into `start` or `stop` of the same component observes the
/// in-progress state and returns instead of deadlocking.
pub struct LifecycleSupport {
    state: RwLock<LifecycleState>,
    transition: ReentrantMutex<()>,
    listeners: ArcSwap<Vec<Arc<dyn LifecycleListener>>>,
    listeners_lock: Mutex<()>,
}

impl Default for LifecycleSupport {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSupport {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::New),
            transition: ReentrantMutex::new(()),
            listeners: ArcSwap::from_pointee(Vec::new()),
            listeners_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        let _guard = self.listeners_lock.lock();
        let mut next = Vec::clone(&self.listeners.load());
        next.push(listener);
        self.listeners.store(Arc::new(next));
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        let _guard = self.listeners_lock.lock();
        let current = self.listeners.load();
        let Some(idx) = current.iter().position(|l| same_listener(l, listener)) else {
            return false;
        };
        let mut next = Vec::clone(&current);
        next.remove(idx);
        self.listeners.store(Arc::new(next));
        true
    }

    pub fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        Vec::clone(&self.listeners.load())
    }

    /// Notify every listener registered at the time of the call.
    pub fn fire(&self, source: &dyn Lifecycle, kind: LifecycleEventType, data: Option<&EventData>) {
        let snapshot = self.listeners.load_full();
        let event = LifecycleEvent::new(source, kind, data);
        for listener in snapshot.iter() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.lifecycle_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    component = %source.component_name(),
                    event = %kind,
                    "lifecycle listener failed: {e:?}"
                ),
                Err(panic) => error!(
                    component = %source.component_name(),
                    event = %kind,
                    "lifecycle listener panicked: {}",
                    panic_message(&panic)
                ),
            }
        }
    }

    /// `New → Initialized`. No-op in any other state.
    pub fn init<F>(&self, source: &dyn Lifecycle, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _guard = self.transition.lock();
        if self.state() != LifecycleState::New {
            return Ok(());
        }
        body()?;
        self.set_state(LifecycleState::Initialized);
        self.fire(source, LifecycleEventType::Init, None);
        Ok(())
    }

    /// Runs `body` between `before_start` and `start`.
    ///
    /// A failing body restores the prior state and fires nothing further.
    pub fn start<F>(&self, source: &dyn Lifecycle, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _guard = self.transition.lock();
        let prior = self.state();
        match prior {
            LifecycleState::Starting | LifecycleState::Started => {
                debug!(component = %source.component_name(), "already started");
                return Ok(());
            }
            LifecycleState::New => {
                return Err(Error::lifecycle(
                    source.component_name(),
                    "start requested before init",
                ))
            }
            LifecycleState::Stopping | LifecycleState::Destroyed => {
                return Err(Error::lifecycle(
                    source.component_name(),
                    format!("cannot start from state {prior}"),
                ))
            }
            LifecycleState::Initialized | LifecycleState::Stopped => {}
        }

        self.set_state(LifecycleState::Starting);
        self.fire(source, LifecycleEventType::BeforeStart, None);
        if let Err(e) = body() {
            self.set_state(prior);
            return Err(e);
        }
        self.fire(source, LifecycleEventType::Start, None);
        self.set_state(LifecycleState::Started);
        self.fire(source, LifecycleEventType::AfterStart, None);
        Ok(())
    }

    /// Runs `body` between `stop` and `after_stop`. No-op unless started.
    pub fn stop<F>(&self, source: &dyn Lifecycle, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _guard = self.transition.lock();
        let prior = self.state();
        if prior != LifecycleState::Started {
            debug!(component = %source.component_name(), state = %prior, "stop ignored");
            return Ok(());
        }

        self.fire(source, LifecycleEventType::BeforeStop, None);
        self.set_state(LifecycleState::Stopping);
        self.fire(source, LifecycleEventType::Stop, None);
        if let Err(e) = body() {
            self.set_state(prior);
            return Err(e);
        }
        self.set_state(LifecycleState::Stopped);
        self.fire(source, LifecycleEventType::AfterStop, None);
        Ok(())
    }

    /// Final transition. The component must not be running.
    pub fn destroy<F>(&self, source: &dyn Lifecycle, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _guard = self.transition.lock();
        match self.state() {
            LifecycleState::Destroyed => return Ok(()),
            LifecycleState::Starting | LifecycleState::Started | LifecycleState::Stopping => {
                return Err(Error::lifecycle(
                    source.component_name(),
                    "destroy requested while running",
                ))
            }
            _ => {}
        }
        body()?;
        self.set_state(LifecycleState::Destroyed);
        self.fire(source, LifecycleEventType::Destroy, None);
        Ok(())
    }
}

/// Text of a caught panic payload.
pub fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
