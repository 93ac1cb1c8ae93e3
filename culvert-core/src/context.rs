use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use tracing::info;

use crate::{
    config::{EndpointConfig, ExecutorConfig},
    endpoint::{ConnectionHandler, Endpoint, Executor, StandardExecutor},
    registry::ComponentRegistry,
    Result,
};

/// Server-wide shared state: the component registry and the named
/// executors endpoints may share. Created once and passed to whatever
/// assembles the server.
pub struct ServerContext {
    registry: ComponentRegistry,
    executors: RwLock<BTreeMap<String, Arc<dyn Executor>>>,
}

impl ServerContext {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry,
            executors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn add_executor(&self, executor: Arc<dyn Executor>) -> Result<()> {
        let mut executors = self.executors.write();
        let name = executor.name().to_string();
        if executors.contains_key(&name) {
            return Err(invalid_config!("executor {name} is already defined"));
        }
        info!(executor = %name, "executor registered");
        executors.insert(name, executor);
        Ok(())
    }

    /// Build a [`StandardExecutor`] and register it under its name.
    pub fn create_executor(&self, config: ExecutorConfig) -> Result<Arc<dyn Executor>> {
        let executor: Arc<dyn Executor> = Arc::new(StandardExecutor::new(config)?);
        self.add_executor(executor.clone())?;
        Ok(executor)
    }

    pub fn executor(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().get(name).cloned()
    }

    pub fn executors(&self) -> Vec<Arc<dyn Executor>> {
        self.executors.read().values().cloned().collect()
    }

    /// Build an endpoint, resolving the executor it names.
    pub fn build_endpoint(
        &self,
        config: EndpointConfig,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Endpoint> {
        let executor = match &config.executor {
            Some(name) => Some(self.executor(name).ok_or_else(|| {
                invalid_config!("endpoint {}: unknown executor {name}", config.name)
            })?),
            None => None,
        };
        let mut builder = Endpoint::builder(config, handler);
        if let Some(executor) = executor {
            builder = builder.executor(executor);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::{endpoint::Connection, Error};

    struct Discard;

    impl ConnectionHandler for Discard {
        fn process(&self, _conn: &mut Connection) -> bool {
            false
        }
    }

    #[test]
    fn endpoints_resolve_named_executors() {
        let context = ServerContext::new(ComponentRegistry::new());
        context.create_executor(ExecutorConfig::new("shared")).unwrap();
        assert!(matches!(
            context.create_executor(ExecutorConfig::new("shared")),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = EndpointConfig::new("http", Ipv4Addr::LOCALHOST.into(), 0);
        config.executor = Some("shared".to_string());
        config.max_workers = -1;
        let endpoint = context.build_endpoint(config.clone(), Arc::new(Discard)).unwrap();
        assert_eq!(endpoint.stats().executor.as_deref(), Some("shared"));

        config.executor = Some("nope".to_string());
        assert!(context.build_endpoint(config, Arc::new(Discard)).is_err());
        assert_eq!(context.executors().len(), 1);
    }
}
