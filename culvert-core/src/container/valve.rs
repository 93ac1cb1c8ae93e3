use std::sync::Arc;

use super::{Container, Exchange};
use crate::AnyResult;

/// Result of running a request through a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Some unit produced the response.
    Handled,
    /// Nothing in the tree matched the request.
    NoHandler,
}

/// A processing unit in a container's pipeline.
///
/// A valve either calls [`Next::proceed`] to continue, returns without
/// calling it to short-circuit, or returns an error for a request-local
/// fault.
pub trait Valve: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome>;

    /// Periodic maintenance, called from the owning container's tick.
    fn background_process(&self) {}
}

/// Domain handling performed by a wrapper.
pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, exchange: &mut Exchange) -> AnyResult<()>;
}

/// The remainder of a pipeline, handed to each valve.
pub struct Next<'a> {
    container: &'a Container,
    valves: &'a [Arc<dyn Valve>],
    terminal: Option<&'a Arc<dyn Valve>>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        container: &'a Container,
        valves: &'a [Arc<dyn Valve>],
        terminal: &'a Arc<dyn Valve>,
    ) -> Self {
        Self {
            container,
            valves,
            terminal: Some(terminal),
        }
    }

    /// The container whose pipeline is running.
    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// Run the next valve. Past the terminal there is nothing left and the
    /// result is [`Outcome::NoHandler`].
    pub fn proceed(self, exchange: &mut Exchange) -> AnyResult<Outcome> {
        match self.valves.split_first() {
            Some((valve, rest)) => valve.invoke(
                exchange,
                Next {
                    container: self.container,
                    valves: rest,
                    terminal: self.terminal,
                },
            ),
            None => match self.terminal {
                Some(terminal) => terminal.invoke(
                    exchange,
                    Next {
                        container: self.container,
                        valves: &[],
                        terminal: None,
                    },
                ),
                None => Ok(Outcome::NoHandler),
            },
        }
    }
}

pub(crate) fn same_valve(a: &Arc<dyn Valve>, b: &Arc<dyn Valve>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
