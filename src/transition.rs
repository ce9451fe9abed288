//! Table-driven state holders shared by the pump and WiFi state machines.
//!
//! Each machine declares its allowed moves once as a `const` [`TransitionTable`].
//! A [`StateHolder`] is the only writer of the current value; any number of
//! [`StateReader`] handles can observe it with a single atomic load.

use crate::types::{PumpState, WifiState};
use log::{info, warn};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// A state enum that fits in one byte.
pub trait MachineState: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Short label used in logs.
    const MACHINE: &'static str;

    fn to_raw(self) -> u8;
    fn from_raw(raw: u8) -> Option<Self>;
    fn name(&self) -> &'static str;
}

impl MachineState for PumpState {
    const MACHINE: &'static str = "PumpState";

    fn to_raw(self) -> u8 {
        self as u8
    }

    fn from_raw(raw: u8) -> Option<Self> {
        PumpState::ALL.get(raw as usize).copied()
    }

    fn name(&self) -> &'static str {
        PumpState::name(self)
    }
}

impl MachineState for WifiState {
    const MACHINE: &'static str = "WifiState";

    fn to_raw(self) -> u8 {
        self as u8
    }

    fn from_raw(raw: u8) -> Option<Self> {
        WifiState::ALL.get(raw as usize).copied()
    }

    fn name(&self) -> &'static str {
        WifiState::name(self)
    }
}

/// Adjacency list: for each state, the states reachable in one step.
/// States missing from the list have no outgoing edges.
pub struct TransitionTable<S: 'static> {
    edges: &'static [(S, &'static [S])],
}

impl<S: MachineState> TransitionTable<S> {
    pub const fn new(edges: &'static [(S, &'static [S])]) -> Self {
        Self { edges }
    }

    pub fn targets(&self, from: S) -> &'static [S] {
        self.edges
            .iter()
            .find(|(state, _)| *state == from)
            .map(|(_, targets)| *targets)
            .unwrap_or(&[])
    }

    pub fn allows(&self, from: S, to: S) -> bool {
        self.targets(from).contains(&to)
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.targets(state).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError<S> {
    InvalidTransition { from: S, to: S },
}

impl<S: MachineState> fmt::Display for TransitionError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::InvalidTransition { from, to } => write!(
                f,
                "invalid {} transition: {} -> {}",
                S::MACHINE,
                from.name(),
                to.name()
            ),
        }
    }
}

impl<S: MachineState> std::error::Error for TransitionError<S> {}

/// Read-only view of a state holder. Cheap to clone and safe to use from
/// any task or callback.
#[derive(Clone)]
pub struct StateReader<S> {
    raw: Arc<AtomicU8>,
    _state: PhantomData<S>,
}

impl<S: MachineState> StateReader<S> {
    pub fn get(&self) -> S {
        load(&self.raw)
    }
}

fn load<S: MachineState>(raw: &AtomicU8) -> S {
    let raw = raw.load(Ordering::Acquire);
    // Only StateHolder stores into `raw`, always from a valid S.
    S::from_raw(raw).unwrap_or_else(|| unreachable!("corrupt {} value {}", S::MACHINE, raw))
}

/// The single writer of a state machine's current value.
pub struct StateHolder<S: 'static> {
    raw: Arc<AtomicU8>,
    table: &'static TransitionTable<S>,
}

impl<S: MachineState> StateHolder<S> {
    pub fn new(initial: S, table: &'static TransitionTable<S>) -> Self {
        Self {
            raw: Arc::new(AtomicU8::new(initial.to_raw())),
            table,
        }
    }

    pub fn get(&self) -> S {
        load(&self.raw)
    }

    pub fn reader(&self) -> StateReader<S> {
        StateReader {
            raw: Arc::clone(&self.raw),
            _state: PhantomData,
        }
    }

    pub fn table(&self) -> &'static TransitionTable<S> {
        self.table
    }

    pub fn can_transition(&self, to: S) -> bool {
        self.table.allows(self.get(), to)
    }

    pub fn transition(&mut self, to: S) -> Result<Transition<S>, TransitionError<S>> {
        let from = self.get();
        if !self.table.allows(from, to) {
            return Err(TransitionError::InvalidTransition { from, to });
        }

        self.raw.store(to.to_raw(), Ordering::Release);
        info!("{} transition: {} -> {}", S::MACHINE, from.name(), to.name());
        Ok(Transition { from, to })
    }

    /// Overwrite the state without consulting the table. Reserved for
    /// boot-time restore and operator resets.
    pub fn force(&mut self, to: S) -> Transition<S> {
        let from = self.get();
        self.raw.store(to.to_raw(), Ordering::Release);
        warn!("{} forced: {} -> {}", S::MACHINE, from.name(), to.name());
        Transition { from, to }
    }
}
