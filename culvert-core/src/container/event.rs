use std::{fmt, sync::Arc};

use super::{Container, Valve};
use crate::AnyResult;

/// Structural change of a container.
pub enum ContainerEvent<'a> {
    AddChild(&'a Arc<Container>),
    RemoveChild(&'a Arc<Container>),
    AddValve(&'a Arc<dyn Valve>),
    RemoveValve(&'a Arc<dyn Valve>),
}

impl ContainerEvent<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerEvent::AddChild(_) => "add_child",
            ContainerEvent::RemoveChild(_) => "remove_child",
            ContainerEvent::AddValve(_) => "add_valve",
            ContainerEvent::RemoveValve(_) => "remove_valve",
        }
    }
}

impl fmt::Debug for ContainerEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerEvent::AddChild(c) | ContainerEvent::RemoveChild(c) => {
                write!(f, "{}({})", self.as_str(), c.name())
            }
            ContainerEvent::AddValve(v) | ContainerEvent::RemoveValve(v) => {
                write!(f, "{}({})", self.as_str(), v.name())
            }
        }
    }
}

/// Observer of structural changes. Failures are logged by the container and
/// do not undo the change.
pub trait ContainerListener: Send + Sync {
    fn container_event(&self, container: &Container, event: &ContainerEvent<'_>) -> AnyResult<()>;
}
