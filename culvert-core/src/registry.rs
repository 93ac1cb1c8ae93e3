//! Identifier → factory tables for the pluggable units of a server.
//!
//! Units are only created while a configuration is assembled; a missing
//! identifier or a factory that refuses its parameters fails the assembly.
use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    config::ComponentConfig,
    container::{Container, RequestHandler, Valve},
    endpoint::ConnectionHandler,
    AnyResult, Result,
};

pub type ValveCreateFn = fn(&JsonValue) -> AnyResult<Arc<dyn Valve>>;
pub type RequestHandlerCreateFn = fn(&JsonValue) -> AnyResult<Arc<dyn RequestHandler>>;
/// Connection handlers receive the engine requests are dispatched into.
pub type ConnectionHandlerCreateFn =
    fn(&Arc<Container>, &JsonValue) -> AnyResult<Arc<dyn ConnectionHandler>>;

#[derive(Default)]
pub struct ComponentRegistry {
    valves: BTreeMap<String, ValveCreateFn>,
    request_handlers: BTreeMap<String, RequestHandlerCreateFn>,
    connection_handlers: BTreeMap<String, ConnectionHandlerCreateFn>,
}

fn register<F>(table: &mut BTreeMap<String, F>, kind: &str, name: &str, factory: F) -> Result<()> {
    if table.contains_key(name) {
        return Err(invalid_config!("{kind} {name} is already registered"));
    }
    debug!(kind, name, "factory registered");
    table.insert(name.to_string(), factory);
    Ok(())
}

fn lookup<'a, F>(table: &'a BTreeMap<String, F>, kind: &str, name: &str) -> Result<&'a F> {
    table
        .get(name)
        .ok_or_else(|| invalid_config!("unknown {kind} type {name}"))
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_valve(&mut self, name: &str, factory: ValveCreateFn) -> Result<()> {
        register(&mut self.valves, "valve", name, factory)
    }

    pub fn register_request_handler(
        &mut self,
        name: &str,
        factory: RequestHandlerCreateFn,
    ) -> Result<()> {
        register(&mut self.request_handlers, "request handler", name, factory)
    }

    pub fn register_connection_handler(
        &mut self,
        name: &str,
        factory: ConnectionHandlerCreateFn,
    ) -> Result<()> {
        register(&mut self.connection_handlers, "connection handler", name, factory)
    }

    pub fn build_valve(&self, config: &ComponentConfig) -> Result<Arc<dyn Valve>> {
        let factory = lookup(&self.valves, "valve", &config.kind)?;
        factory(&config.params)
            .map_err(|e| invalid_config!("valve {}: {e:#}", config.kind))
    }

    pub fn build_request_handler(
        &self,
        config: &ComponentConfig,
    ) -> Result<Arc<dyn RequestHandler>> {
        let factory = lookup(&self.request_handlers, "request handler", &config.kind)?;
        factory(&config.params)
            .map_err(|e| invalid_config!("request handler {}: {e:#}", config.kind))
    }

    pub fn build_connection_handler(
        &self,
        engine: &Arc<Container>,
        config: &ComponentConfig,
    ) -> Result<Arc<dyn ConnectionHandler>> {
        let factory = lookup(&self.connection_handlers, "connection handler", &config.kind)?;
        factory(engine, &config.params)
            .map_err(|e| invalid_config!("connection handler {}: {e:#}", config.kind))
    }

    pub fn valve_names(&self) -> impl Iterator<Item = &str> {
        self.valves.keys().map(String::as_str)
    }

    pub fn request_handler_names(&self) -> impl Iterator<Item = &str> {
        self.request_handlers.keys().map(String::as_str)
    }

    pub fn connection_handler_names(&self) -> impl Iterator<Item = &str> {
        self.connection_handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("valves", &self.valves.keys().collect::<Vec<_>>())
            .field("request_handlers", &self.request_handlers.keys().collect::<Vec<_>>())
            .field(
                "connection_handlers",
                &self.connection_handlers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        container::{Exchange, Next, Outcome},
        Error,
    };

    struct Tagged(String);

    impl Valve for Tagged {
        fn name(&self) -> &str {
            &self.0
        }

        fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
            next.proceed(exchange)
        }
    }

    fn create_tagged(params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
        let Some(tag) = params.get("tag").and_then(JsonValue::as_str) else {
            anyhow::bail!("missing tag");
        };
        Ok(Arc::new(Tagged(tag.to_string())))
    }

    #[test]
    fn builds_registered_units() {
        let mut registry = ComponentRegistry::new();
        registry.register_valve("tagged", create_tagged).unwrap();
        assert!(matches!(
            registry.register_valve("tagged", create_tagged),
            Err(Error::InvalidConfig(_))
        ));

        let config = ComponentConfig {
            kind: "tagged".to_string(),
            params: json!({"tag": "first"}),
        };
        assert_eq!(registry.build_valve(&config).unwrap().name(), "first");
        assert_eq!(registry.valve_names().collect::<Vec<_>>(), vec!["tagged"]);
    }

    #[test]
    fn unknown_or_refused_units_fail_assembly() {
        let mut registry = ComponentRegistry::new();
        registry.register_valve("tagged", create_tagged).unwrap();

        let err = registry
            .build_valve(&ComponentConfig::new("missing"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown valve type missing"));

        let err = registry
            .build_valve(&ComponentConfig::new("tagged"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing tag"));
        assert!(registry.build_request_handler(&ComponentConfig::new("tagged")).is_err());
    }
}
