use std::{fmt, sync::Arc};

use serde::Serialize;

use super::{
    terminal::{ContextTerminal, EngineTerminal, HostTerminal, WrapperTerminal},
    Valve,
};
use crate::config::DEFAULT_ENGINE_INTERVAL_SECS;

/// Level of a container in the tree.
///
/// The tier decides which children a container accepts and which terminal
/// valve closes its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Engine,
    Host,
    Context,
    Wrapper,
}

impl Tier {
    pub fn accepts(&self, child: Tier) -> bool {
        matches!(
            (self, child),
            (Tier::Engine, Tier::Host)
                | (Tier::Host, Tier::Context)
                | (Tier::Context, Tier::Wrapper)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Engine => "Engine",
            Tier::Host => "Host",
            Tier::Context => "Context",
            Tier::Wrapper => "Wrapper",
        }
    }

    pub(crate) fn default_terminal(&self) -> Arc<dyn Valve> {
        match self {
            Tier::Engine => Arc::new(EngineTerminal),
            Tier::Host => Arc::new(HostTerminal),
            Tier::Context => Arc::new(ContextTerminal),
            Tier::Wrapper => Arc::new(WrapperTerminal),
        }
    }

    /// Background tick in seconds used when none is configured.
    pub fn default_background_interval(&self) -> i64 {
        match self {
            Tier::Engine => DEFAULT_ENGINE_INTERVAL_SECS,
            _ => 0,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_policy() {
        let all = [Tier::Engine, Tier::Host, Tier::Context, Tier::Wrapper];
        let accepted: Vec<_> = all
            .iter()
            .flat_map(|p| all.iter().filter(|c| p.accepts(**c)).map(move |c| (*p, *c)))
            .collect();
        assert_eq!(
            accepted,
            vec![
                (Tier::Engine, Tier::Host),
                (Tier::Host, Tier::Context),
                (Tier::Context, Tier::Wrapper)
            ]
        );
        assert_eq!(Tier::Engine.default_background_interval(), 10);
        assert_eq!(Tier::Wrapper.default_background_interval(), 0);
    }
}
