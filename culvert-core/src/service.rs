use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    container::{Container, ContainerSnapshot},
    endpoint::{Endpoint, EndpointStats, Executor, ExecutorStats},
    lifecycle::{Lifecycle, LifecycleListener, LifecycleState, LifecycleSupport},
    Result,
};

/// One engine together with the connectors feeding it and the executors
/// they share.
///
/// Start order is executors, engine, connectors. Stopping pauses the
/// connectors first so no new work arrives, then stops connectors, engine
/// and executors in that order.
pub struct Service {
    name: String,
    engine: Arc<Container>,
    connectors: RwLock<Vec<Endpoint>>,
    executors: RwLock<Vec<Arc<dyn Executor>>>,
    lifecycle: LifecycleSupport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub state: LifecycleState,
    pub executors: Vec<ExecutorStats>,
    pub connectors: Vec<EndpointStats>,
    pub engine: ContainerSnapshot,
}

impl Service {
    pub fn new(name: impl Into<String>, engine: Arc<Container>) -> Self {
        Self {
            name: name.into(),
            engine,
            connectors: RwLock::new(Vec::new()),
            executors: RwLock::new(Vec::new()),
            lifecycle: LifecycleSupport::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<Container> {
        &self.engine
    }

    /// Add a connector, starting it when the service already runs.
    pub fn add_connector(&self, connector: Endpoint) -> Result<()> {
        if self.state().is_available() {
            connector.start()?;
        }
        self.connectors.write().push(connector);
        Ok(())
    }

    /// Stop, destroy and forget the connector called `name`.
    pub fn remove_connector(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut connectors = self.connectors.write();
            match connectors.iter().position(|c| c.name() == name) {
                Some(idx) => connectors.remove(idx),
                None => return Ok(false),
            }
        };
        removed.destroy()?;
        Ok(true)
    }

    pub fn find_connectors(&self) -> Vec<Endpoint> {
        self.connectors.read().clone()
    }

    pub fn add_executor(&self, executor: Arc<dyn Executor>) -> Result<()> {
        if self.state().is_available() {
            executor.start()?;
        }
        self.executors.write().push(executor);
        Ok(())
    }

    pub fn find_executors(&self) -> Vec<Arc<dyn Executor>> {
        self.executors.read().clone()
    }

    pub fn pause(&self) {
        for connector in self.find_connectors() {
            connector.pause();
        }
    }

    pub fn resume(&self) {
        for connector in self.find_connectors() {
            connector.resume();
        }
    }

    /// Stop what a failed start had already started, newest first.
    fn roll_back_start(
        &self,
        executors: &[Arc<dyn Executor>],
        engine_started: bool,
        connectors: &[Endpoint],
    ) {
        for connector in connectors.iter().rev() {
            if let Err(e) = connector.stop() {
                warn!(service = %self.name, connector = %connector.name(), "rollback: {e}");
            }
        }
        if engine_started {
            if let Err(e) = self.engine.stop() {
                warn!(service = %self.name, engine = %self.engine, "rollback: {e}");
            }
        }
        for executor in executors.iter().rev() {
            if let Err(e) = executor.stop() {
                warn!(service = %self.name, executor = %executor.name(), "rollback: {e}");
            }
        }
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name.clone(),
            state: self.state(),
            executors: self.find_executors().iter().map(|e| e.stats()).collect(),
            connectors: self.find_connectors().iter().map(Endpoint::stats).collect(),
            engine: self.engine.snapshot(),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("engine", &self.engine.name())
            .field("connectors", &self.connectors.read().len())
            .field("executors", &self.executors.read().len())
            .finish()
    }
}

impl Lifecycle for Service {
    fn component_name(&self) -> String {
        format!("Service[{}]", self.name)
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

    /// Initialize the engine and bind every connector. When a connector
    /// fails to bind, the ones bound before it release their sockets.
    fn init(&self) -> Result<()> {
        self.lifecycle.init(self, || {
            for executor in self.find_executors() {
                executor.init()?;
            }
            self.engine.init()?;
            let connectors = self.find_connectors();
            for (idx, connector) in connectors.iter().enumerate() {
                if let Err(e) = connector.init() {
                    for bound in connectors[..idx].iter().rev() {
                        bound.unbind();
                    }
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::New {
            self.init()?;
        }
        self.lifecycle.start(self, || {
            let executors = self.find_executors();
            for (idx, executor) in executors.iter().enumerate() {
                if let Err(e) = executor.start() {
                    self.roll_back_start(&executors[..idx], false, &[]);
                    return Err(e);
                }
            }
            if let Err(e) = self.engine.start() {
                self.roll_back_start(&executors, false, &[]);
                return Err(e);
            }
            let connectors = self.find_connectors();
            for (idx, connector) in connectors.iter().enumerate() {
                if let Err(e) = connector.start() {
                    self.roll_back_start(&executors, true, &connectors[..idx]);
                    return Err(e);
                }
            }
            info!(service = %self.name, "service started");
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        if self.state() == LifecycleState::Started {
            self.pause();
        }
        self.lifecycle.stop(self, || {
            for connector in self.find_connectors() {
                if let Err(e) = connector.stop() {
                    let connector = connector.name();
                    warn!(service = %self.name, %connector, "unable to stop connector: {e}");
                }
            }
            self.engine.stop()?;
            for executor in self.find_executors() {
                if let Err(e) = executor.stop() {
                    let executor = executor.name();
                    warn!(service = %self.name, %executor, "unable to stop executor: {e}");
                }
            }
            info!(service = %self.name, "service stopped");
            Ok(())
        })
    }

    fn destroy(&self) -> Result<()> {
        self.stop()?;
        self.lifecycle.destroy(self, || {
            for connector in self.find_connectors() {
                connector.destroy()?;
            }
            self.engine.destroy()?;
            for executor in self.find_executors() {
                executor.destroy()?;
            }
            Ok(())
        })
    }
}
