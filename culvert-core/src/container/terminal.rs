//! Terminal valves closing each tier's pipeline. Each one selects the
//! matching child and continues into its pipeline.
use tracing::debug;

use super::{Exchange, Next, Outcome, Valve};
use crate::AnyResult;

pub(crate) struct EngineTerminal;

impl Valve for EngineTerminal {
    fn name(&self) -> &str {
        "engine"
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let engine = next.container();
        let requested = exchange.server_name();
        let host = requested
            .as_deref()
            .and_then(|name| engine.find_host(name))
            .or_else(|| engine.default_host().and_then(|name| engine.find_host(&name)));
        let Some(host) = host else {
            debug!(container = %engine, host = ?requested, "no host matches request");
            return Ok(Outcome::NoHandler);
        };
        exchange.mapping_mut().host = Some(host.name());
        host.invoke(exchange)
    }
}

pub(crate) struct HostTerminal;

impl Valve for HostTerminal {
    fn name(&self) -> &str {
        "host"
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let host = next.container();
        let Some(context) = host.resolve(exchange.request().uri().path()) else {
            return Ok(Outcome::NoHandler);
        };
        exchange.mapping_mut().context = Some(context.name());
        context.invoke(exchange)
    }
}

pub(crate) struct ContextTerminal;

impl Valve for ContextTerminal {
    fn name(&self) -> &str {
        "context"
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let context = next.container();
        let Some(wrapper) = context.resolve(exchange.context_relative_path()) else {
            return Ok(Outcome::NoHandler);
        };
        exchange.mapping_mut().wrapper = Some(wrapper.name());
        wrapper.invoke(exchange)
    }
}

pub(crate) struct WrapperTerminal;

impl Valve for WrapperTerminal {
    fn name(&self) -> &str {
        "wrapper"
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let wrapper = next.container();
        match wrapper.request_handler() {
            Some(handler) => {
                handler.handle(exchange)?;
                Ok(Outcome::Handled)
            }
            None => {
                debug!(container = %wrapper, "wrapper has no request handler");
                Ok(Outcome::NoHandler)
            }
        }
    }
}
