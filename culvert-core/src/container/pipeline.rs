use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{
    valve::{same_valve, Next},
    Container, Exchange, Outcome, Valve,
};
use crate::{AnyResult, Result};

struct ValveSet {
    valves: Vec<Arc<dyn Valve>>,
    terminal: Arc<dyn Valve>,
}

/// Ordered valves of one container, closed by a terminal valve.
///
/// Requests run against a snapshot of the chain, so edits never disturb
/// requests already in flight.
pub struct Pipeline {
    chain: ArcSwap<ValveSet>,
    lock: Mutex<()>,
}

impl Pipeline {
    pub(crate) fn new(terminal: Arc<dyn Valve>) -> Self {
        Self {
            chain: ArcSwap::from_pointee(ValveSet {
                valves: Vec::new(),
                terminal,
            }),
            lock: Mutex::new(()),
        }
    }

    fn update<F: FnOnce(&mut Vec<Arc<dyn Valve>>, &mut Arc<dyn Valve>)>(&self, f: F) {
        let _guard = self.lock.lock();
        let current = self.chain.load();
        let mut valves = current.valves.clone();
        let mut terminal = current.terminal.clone();
        f(&mut valves, &mut terminal);
        self.chain.store(Arc::new(ValveSet { valves, terminal }));
    }

    /// Append before the terminal.
    pub(crate) fn add_valve(&self, valve: Arc<dyn Valve>) {
        self.update(|valves, _| valves.push(valve));
    }

    /// Returns `false` when the valve is not part of the chain. The
    /// terminal can only be replaced, never removed.
    pub(crate) fn remove_valve(&self, valve: &Arc<dyn Valve>) -> Result<bool> {
        if same_valve(&self.terminal(), valve) {
            return Err(policy_violation!(
                "terminal valve {} cannot be removed",
                valve.name()
            ));
        }
        let mut removed = false;
        self.update(|valves, _| {
            if let Some(idx) = valves.iter().position(|v| same_valve(v, valve)) {
                valves.remove(idx);
                removed = true;
            }
        });
        Ok(removed)
    }

    pub(crate) fn set_terminal(&self, valve: Arc<dyn Valve>) {
        self.update(|_, terminal| *terminal = valve);
    }

    pub fn terminal(&self) -> Arc<dyn Valve> {
        self.chain.load().terminal.clone()
    }

    pub fn contains(&self, valve: &Arc<dyn Valve>) -> bool {
        let chain = self.chain.load();
        same_valve(&chain.terminal, valve) || chain.valves.iter().any(|v| same_valve(v, valve))
    }

    /// Every valve in execution order, terminal last.
    pub fn valves(&self) -> Vec<Arc<dyn Valve>> {
        let chain = self.chain.load();
        let mut all = chain.valves.clone();
        all.push(chain.terminal.clone());
        all
    }

    pub fn invoke(&self, container: &Container, exchange: &mut Exchange) -> AnyResult<Outcome> {
        let chain = self.chain.load_full();
        Next::new(container, &chain.valves, &chain.terminal).proceed(exchange)
    }

    pub(crate) fn background_process(&self) {
        let chain = self.chain.load_full();
        for valve in chain.valves.iter() {
            valve.background_process();
        }
        chain.terminal.background_process();
    }
}
