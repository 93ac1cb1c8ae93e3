//! Assembles a [`Service`] from a [`Config`] using the component registry.
use std::sync::Arc;

use culvert_core::{
    config::{ContainerConfig, ContextConfig, EngineConfig, HostConfig, WrapperConfig},
    ComponentRegistry, Container, ServerContext, Service,
};
use tracing::{debug, info};

use crate::config::Config;

/// A registry with every built-in unit.
pub fn builtin_registry() -> anyhow::Result<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    culvert_services::register_builtins(&mut registry)?;
    Ok(registry)
}

pub fn build_service(config: &Config, context: &ServerContext) -> anyhow::Result<Service> {
    for executor in &config.executors {
        context.create_executor(executor.clone())?;
    }
    let engine = build_engine(&config.engine, context.registry())?;
    let service = Service::new(&config.service.name, engine.clone());
    for executor in context.executors() {
        service.add_executor(executor)?;
    }
    for connector in &config.connectors {
        let handler = context
            .registry()
            .build_connection_handler(&engine, &connector.handler)?;
        let endpoint = context.build_endpoint(connector.endpoint.clone(), handler)?;
        info!(
            connector = %connector.endpoint.name,
            addr = %connector.endpoint.socket_addr(),
            handler = %connector.handler.kind,
            "connector configured"
        );
        service.add_connector(endpoint)?;
    }
    Ok(service)
}

pub fn build_engine(
    config: &EngineConfig,
    registry: &ComponentRegistry,
) -> anyhow::Result<Arc<Container>> {
    config.validate()?;
    let engine = Container::engine(&config.container.name);
    apply_container(&engine, &config.container, registry)?;
    for host in &config.hosts {
        engine.add_child(build_host(host, registry)?)?;
    }
    engine.set_default_host(Some(config.default_host.as_str()));
    Ok(engine)
}

fn build_host(config: &HostConfig, registry: &ComponentRegistry) -> anyhow::Result<Arc<Container>> {
    let host = Container::host(&config.container.name);
    apply_container(&host, &config.container, registry)?;
    for alias in &config.aliases {
        host.add_alias(alias);
    }
    if let Some(kind) = &config.error_report_valve {
        let valve = registry.build_valve(&culvert_core::config::ComponentConfig::new(kind))?;
        host.set_error_report_valve(Some(valve));
    }
    for context in &config.contexts {
        host.add_child(build_context(context, registry)?)?;
    }
    Ok(host)
}

fn build_context(
    config: &ContextConfig,
    registry: &ComponentRegistry,
) -> anyhow::Result<Arc<Container>> {
    let context = Container::context(&config.container.name);
    apply_container(&context, &config.container, registry)?;
    for wrapper in &config.wrappers {
        context.add_child(build_wrapper(wrapper, registry)?)?;
    }
    Ok(context)
}

fn build_wrapper(
    config: &WrapperConfig,
    registry: &ComponentRegistry,
) -> anyhow::Result<Arc<Container>> {
    let wrapper = Container::wrapper(&config.container.name);
    apply_container(&wrapper, &config.container, registry)?;
    wrapper.set_request_handler(Some(registry.build_request_handler(&config.handler)?));
    Ok(wrapper)
}

fn apply_container(
    container: &Container,
    config: &ContainerConfig,
    registry: &ComponentRegistry,
) -> anyhow::Result<()> {
    for valve in &config.valves {
        container.add_valve(registry.build_valve(valve)?);
    }
    if let Some(secs) = config.background_interval_secs {
        container.set_background_interval(secs);
    }
    debug!(container = %container, valves = config.valves.len(), "container configured");
    Ok(())
}
