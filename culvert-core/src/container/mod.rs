//! The container tree.
//!
//! Engine, host, context and wrapper are all the same [`Container`] type;
//! the [`Tier`] decides which children are accepted and which terminal valve
//! closes the pipeline. Parents own their children, children keep a weak
//! link back to the parent.
//!
//! A request enters at the engine and walks down: every container runs its
//! [`Pipeline`], whose terminal valve picks the most specific child and
//! continues there, until the wrapper's [`RequestHandler`] produces the
//! response.
use std::{
    collections::BTreeMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicI64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, warn};

use crate::{
    lifecycle::{
        panic_message, Lifecycle, LifecycleEventType, LifecycleListener, LifecycleState,
        LifecycleSupport,
    },
    AnyResult, Result,
};

mod associations;
mod event;
mod exchange;
mod pipeline;
mod terminal;
mod tier;
mod valve;

pub use associations::{Loader, Logger, Manager, Realm, TracingLogger};
pub use event::{ContainerEvent, ContainerListener};
pub use exchange::{Exchange, MappingData};
pub use pipeline::Pipeline;
pub use tier::Tier;
pub use valve::{Next, Outcome, RequestHandler, Valve};

use associations::Associations;

type Children = BTreeMap<String, Arc<Container>>;

struct Background {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Container {
    this: Weak<Container>,
    tier: Tier,
    name: RwLock<String>,
    parent: RwLock<Weak<Container>>,
    children: ArcSwap<Children>,
    children_lock: Mutex<()>,
    pipeline: Pipeline,
    lifecycle: LifecycleSupport,
    associations: Associations,
    listeners: ArcSwap<Vec<Arc<dyn ContainerListener>>>,
    listeners_lock: Mutex<()>,
    aliases: RwLock<Vec<String>>,
    default_host: RwLock<Option<String>>,
    request_handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    error_report_valve: RwLock<Option<Arc<dyn Valve>>>,
    background_interval: AtomicI64,
    background: Mutex<Option<Background>>,
}

impl Container {
    pub fn new(tier: Tier, name: impl Into<String>) -> Arc<Self> {
        let name = normalize_name(tier, name.into());
        Arc::new_cyclic(|this| Container {
            this: this.clone(),
            tier,
            name: RwLock::new(name),
            parent: RwLock::new(Weak::new()),
            children: ArcSwap::from_pointee(Children::new()),
            children_lock: Mutex::new(()),
            pipeline: Pipeline::new(tier.default_terminal()),
            lifecycle: LifecycleSupport::new(),
            associations: Associations::default(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            listeners_lock: Mutex::new(()),
            aliases: RwLock::new(Vec::new()),
            default_host: RwLock::new(None),
            request_handler: RwLock::new(None),
            error_report_valve: RwLock::new(None),
            background_interval: AtomicI64::new(tier.default_background_interval()),
            background: Mutex::new(None),
        })
    }

    /// A new engine writes container log lines through [`TracingLogger`]
    /// until another logger is set.
    pub fn engine(name: impl Into<String>) -> Arc<Self> {
        let engine = Self::new(Tier::Engine, name);
        engine.set_logger(Some(Arc::new(TracingLogger)));
        engine
    }

    pub fn host(name: impl Into<String>) -> Arc<Self> {
        Self::new(Tier::Host, name)
    }

    /// `path` is empty for the default context, otherwise starts with `/`.
    pub fn context(path: impl Into<String>) -> Arc<Self> {
        Self::new(Tier::Context, path)
    }

    pub fn wrapper(name: impl Into<String>) -> Arc<Self> {
        Self::new(Tier::Wrapper, name)
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename a detached container.
    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        if self.parent().is_some() {
            return Err(policy_violation!(
                "{self} is attached, its name cannot change"
            ));
        }
        *self.name.write() = normalize_name(self.tier, name.into());
        Ok(())
    }

    pub fn parent(&self) -> Option<Arc<Container>> {
        self.parent.read().upgrade()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Attach `child`.
    ///
    /// Rejected with a policy violation, leaving the tree unchanged, when
    /// the tier does not accept the child, the child already has a parent or
    /// a sibling of the same name exists. If this container is started the
    /// child is started too; a failing start detaches it again.
    pub fn add_child(&self, child: Arc<Container>) -> Result<()> {
        if !self.tier.accepts(child.tier) {
            return Err(policy_violation!(
                "{} cannot be a child of {self}",
                child.tier
            ));
        }
        let name = child.name();
        {
            let _guard = self.children_lock.lock();
            let mut parent = child.parent.write();
            if parent.upgrade().is_some() {
                return Err(policy_violation!("{} {name:?} is already attached", child.tier));
            }
            let current = self.children.load();
            if current.contains_key(&name) {
                return Err(policy_violation!("{self} already has a child named {name:?}"));
            }
            *parent = self.this.clone();
            let mut next = Children::clone(&current);
            next.insert(name.clone(), child.clone());
            self.children.store(Arc::new(next));
        }
        self.log(&format!("child {name:?} added"));
        self.fire_container_event(&ContainerEvent::AddChild(&child));

        if self.state().is_available() {
            if let Err(e) = child.start() {
                warn!(container = %self, child = %name, "unable to start child: {e}");
                if self.detach(&child) {
                    self.log(&format!("child {name:?} removed after failed start"));
                    self.fire_container_event(&ContainerEvent::RemoveChild(&child));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Detach `child` and stop it if it was started. Unknown children are
    /// ignored.
    pub fn remove_child(&self, child: &Arc<Container>) -> Result<()> {
        if !self.detach(child) {
            return Ok(());
        }
        self.log(&format!("child {:?} removed", child.name()));
        self.fire_container_event(&ContainerEvent::RemoveChild(child));
        child.stop()
    }

    fn detach(&self, child: &Arc<Container>) -> bool {
        let _guard = self.children_lock.lock();
        let current = self.children.load();
        let name = child.name();
        match current.get(&name) {
            Some(attached) if Arc::ptr_eq(attached, child) => {}
            _ => return false,
        }
        let mut next = Children::clone(&current);
        next.remove(&name);
        self.children.store(Arc::new(next));
        *child.parent.write() = Weak::new();
        true
    }

    pub fn find_child(&self, name: &str) -> Option<Arc<Container>> {
        self.children.load().get(name).cloned()
    }

    pub fn find_children(&self) -> Vec<Arc<Container>> {
        self.children.load().values().cloned().collect()
    }

    /// Most specific child for `path`: the exact name, then successively
    /// shorter prefixes cut at `/`, then the default child `""`.
    pub fn resolve(&self, path: &str) -> Option<Arc<Container>> {
        let children = self.children.load();
        let mut candidate = path;
        loop {
            if let Some(child) = children.get(candidate) {
                return Some(child.clone());
            }
            match candidate.rfind('/') {
                Some(idx) => candidate = &candidate[..idx],
                None => break,
            }
        }
        let fallback = children.get("").cloned();
        if fallback.is_none() {
            warn!(container = %self, path, "no child matches path");
        }
        fallback
    }

    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        self.pipeline.add_valve(valve.clone());
        self.fire_container_event(&ContainerEvent::AddValve(&valve));
    }

    pub fn remove_valve(&self, valve: &Arc<dyn Valve>) -> Result<bool> {
        let removed = self.pipeline.remove_valve(valve)?;
        if removed {
            self.fire_container_event(&ContainerEvent::RemoveValve(valve));
        }
        Ok(removed)
    }

    /// Replace the terminal valve of the pipeline.
    pub fn set_terminal(&self, valve: Arc<dyn Valve>) {
        self.pipeline.set_terminal(valve);
    }

    /// Run `exchange` through this container's pipeline.
    pub fn invoke(&self, exchange: &mut Exchange) -> AnyResult<Outcome> {
        self.pipeline.invoke(self, exchange)
    }

    pub fn set_loader(&self, loader: Option<Arc<dyn Loader>>) {
        *self.associations.loader.write() = loader;
    }

    /// Own loader, else the nearest ancestor's.
    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.inherited(|c| c.associations.loader.read().clone())
    }

    pub fn set_logger(&self, logger: Option<Arc<dyn Logger>>) {
        *self.associations.logger.write() = logger;
    }

    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.inherited(|c| c.associations.logger.read().clone())
    }

    pub fn set_manager(&self, manager: Option<Arc<dyn Manager>>) {
        *self.associations.manager.write() = manager;
    }

    pub fn manager(&self) -> Option<Arc<dyn Manager>> {
        self.inherited(|c| c.associations.manager.read().clone())
    }

    pub fn set_realm(&self, realm: Option<Arc<dyn Realm>>) {
        *self.associations.realm.write() = realm;
    }

    pub fn realm(&self) -> Option<Arc<dyn Realm>> {
        self.inherited(|c| c.associations.realm.read().clone())
    }

    fn inherited<T, F>(&self, get: F) -> Option<T>
    where
        F: Fn(&Container) -> Option<T>,
    {
        if let Some(found) = get(self) {
            return Some(found);
        }
        let mut ancestor = self.parent();
        while let Some(container) = ancestor {
            if let Some(found) = get(&container) {
                return Some(found);
            }
            ancestor = container.parent();
        }
        None
    }

    /// Write through the effective logger, if any.
    pub fn log(&self, message: &str) {
        if let Some(logger) = self.logger() {
            logger.log(&self.to_string(), message);
        }
    }

    /// Extra names a host answers to. Stored lowercased.
    pub fn add_alias(&self, alias: &str) {
        let alias = alias.to_ascii_lowercase();
        let mut aliases = self.aliases.write();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        let alias = alias.to_ascii_lowercase();
        let mut aliases = self.aliases.write();
        let before = aliases.len();
        aliases.retain(|a| *a != alias);
        aliases.len() != before
    }

    pub fn find_aliases(&self) -> Vec<String> {
        self.aliases.read().clone()
    }

    /// Child host by name or alias.
    pub fn find_host(&self, name: &str) -> Option<Arc<Container>> {
        let name = name.to_ascii_lowercase();
        let children = self.children.load();
        children.get(&name).cloned().or_else(|| {
            children
                .values()
                .find(|host| host.aliases.read().iter().any(|a| *a == name))
                .cloned()
        })
    }

    pub fn set_default_host(&self, name: Option<&str>) {
        *self.default_host.write() = name.map(str::to_ascii_lowercase);
    }

    pub fn default_host(&self) -> Option<String> {
        self.default_host.read().clone()
    }

    pub fn set_request_handler(&self, handler: Option<Arc<dyn RequestHandler>>) {
        *self.request_handler.write() = handler;
    }

    pub fn request_handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.request_handler.read().clone()
    }

    /// Valve appended to the pipeline when the container starts, unless it
    /// is already part of it.
    pub fn set_error_report_valve(&self, valve: Option<Arc<dyn Valve>>) {
        *self.error_report_valve.write() = valve;
    }

    pub fn background_interval(&self) -> i64 {
        self.background_interval.load(Ordering::Acquire)
    }

    /// Seconds between background ticks. Positive values give the container
    /// its own timer, `0` lets the parent's tick drive it and negative
    /// values exclude it from ticks altogether.
    pub fn set_background_interval(&self, secs: i64) {
        self.background_interval.store(secs, Ordering::Release);
    }

    /// One background tick: `periodic` event, valve and collaborator
    /// maintenance, then every child that has no timer of its own.
    pub fn background_process(&self) {
        self.lifecycle.fire(self, LifecycleEventType::Periodic, None);
        self.pipeline.background_process();
        self.associations.background_process();
        for child in self.children.load().values() {
            if child.background_interval() == 0 && child.state().is_available() {
                child.background_process();
            }
        }
    }

    fn start_background(&self) -> Result<()> {
        let secs = self.background_interval();
        if secs <= 0 {
            return Ok(());
        }
        let (stop, ticks) = mpsc::channel::<()>();
        let this = self.this.clone();
        let period = Duration::from_secs(secs as u64);
        let handle = thread::Builder::new()
            .name(format!("{}-background", self.name()))
            .spawn(move || loop {
                match ticks.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => match this.upgrade() {
                        Some(container) => container.background_process(),
                        None => break,
                    },
                    _ => break,
                }
            })
            .map_err(|e| {
                crate::Error::lifecycle(self.to_string(), format!("background thread: {e}"))
            })?;
        *self.background.lock() = Some(Background { stop, handle });
        Ok(())
    }

    fn stop_background(&self) {
        let Some(background) = self.background.lock().take() else {
            return;
        };
        let _ = background.stop.send(());
        // a periodic listener may stop the container from the tick itself
        if background.handle.thread().id() != thread::current().id() {
            let _ = background.handle.join();
        }
    }

    fn start_internal(&self) -> Result<()> {
        if let Some(valve) = self.error_report_valve.read().clone() {
            if !self.pipeline.contains(&valve) {
                self.add_valve(valve);
            }
        }
        let children = self.children.load_full();
        let mut started: Vec<&Arc<Container>> = Vec::new();
        for child in children.values() {
            if let Err(e) = child.start() {
                for done in started.iter().rev() {
                    let _ = done.stop();
                }
                return Err(e);
            }
            started.push(child);
        }
        self.start_background()
    }

    fn stop_internal(&self) {
        self.stop_background();
        let children = self.children.load_full();
        for child in children.values().rev() {
            if let Err(e) = child.stop() {
                error!(container = %self, child = %child.name(), "unable to stop child: {e}");
            }
        }
    }

    pub fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        let _guard = self.listeners_lock.lock();
        let mut next = Vec::clone(&self.listeners.load());
        next.push(listener);
        self.listeners.store(Arc::new(next));
    }

    pub fn remove_container_listener(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        let _guard = self.listeners_lock.lock();
        let current = self.listeners.load();
        let Some(idx) = current
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == Arc::as_ptr(listener) as *const ())
        else {
            return false;
        };
        let mut next = Vec::clone(&current);
        next.remove(idx);
        self.listeners.store(Arc::new(next));
        true
    }

    pub fn find_container_listeners(&self) -> Vec<Arc<dyn ContainerListener>> {
        Vec::clone(&self.listeners.load())
    }

    fn fire_container_event(&self, event: &ContainerEvent<'_>) {
        let listeners = self.listeners.load_full();
        for listener in listeners.iter() {
            let fired = std::panic::catch_unwind(AssertUnwindSafe(|| {
                listener.container_event(self, event)
            }));
            match fired {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(container = %self, event = ?event, "container listener failed: {e:?}")
                }
                Err(panic) => error!(
                    container = %self,
                    event = ?event,
                    "container listener panicked: {}",
                    panic_message(&panic)
                ),
            }
        }
    }

    /// Serializable view of this subtree.
    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            tier: self.tier,
            name: self.name(),
            path: self.to_string(),
            state: self.state(),
            background_interval_secs: self.background_interval(),
            aliases: self.find_aliases(),
            valves: self
                .pipeline
                .valves()
                .iter()
                .map(|v| v.name().to_string())
                .collect(),
            children: self.find_children().iter().map(|c| c.snapshot()).collect(),
        }
    }
}

fn normalize_name(tier: Tier, name: String) -> String {
    match tier {
        Tier::Host => name.to_ascii_lowercase(),
        _ => name,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSnapshot {
    pub tier: Tier,
    pub name: String,
    pub path: String,
    pub state: LifecycleState,
    pub background_interval_secs: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub valves: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContainerSnapshot>,
}

/// `Engine[main].Host[localhost].Context[/app]`
impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}.")?;
        }
        write!(f, "{}[{}]", self.tier.label(), self.name.read())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.to_string())
            .field("state", &self.state())
            .field("children", &self.children.load().len())
            .finish()
    }
}

impl Lifecycle for Container {
    fn component_name(&self) -> String {
        self.to_string()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle.add_listener(listener)
    }

    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        self.lifecycle.remove_listener(listener)
    }

    fn find_lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lifecycle.listeners()
    }

    fn init(&self) -> Result<()> {
        self.lifecycle.init(self, || {
            for child in self.children.load().values() {
                child.init()?;
            }
            Ok(())
        })
    }

    /// Start children in name order, then the background timer.
    fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::New {
            self.init()?;
        }
        self.lifecycle.start(self, || self.start_internal())
    }

    fn stop(&self) -> Result<()> {
        self.lifecycle.stop(self, || {
            self.stop_internal();
            Ok(())
        })
    }

    /// Stop, destroy every child, then leave the parent.
    fn destroy(&self) -> Result<()> {
        self.stop()?;
        self.lifecycle.destroy(self, || {
            for child in self.children.load_full().values() {
                child.destroy()?;
            }
            Ok(())
        })?;
        if let (Some(parent), Some(this)) = (self.parent(), self.this.upgrade()) {
            parent.remove_child(&this)?;
        }
        Ok(())
    }
}
