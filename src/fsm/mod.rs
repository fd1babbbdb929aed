//! Automaton Model Interface
//! The read-mostly view of an automaton the diagram engine consumes, plus an in-memory model

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};


/// State index. Zero means "unassigned".
pub type StateId = u32;
/// Event index. Zero means "unassigned".
pub type EventId = u32;

/// Identifies a transition: (source, event, target).
///
/// Uniqueness of the triple is guaranteed by the automaton, not by the engine. An `event` of
/// zero marks a transition whose event has not been resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransKey {
    pub source: StateId,
    pub event: EventId,
    pub target: StateId,
}

impl TransKey {
    pub fn new(source: StateId, event: EventId, target: StateId) -> Self {
        Self {
            source,
            event,
            target,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// Does this transition touch `state` at either end?
    pub fn touches(&self, state: StateId) -> bool {
        self.source == state || self.target == state
    }
}

/// Source of truth for the engine. All calls are synchronous.
///
/// The engine only ever mutates the automaton through the `request_*` methods, which the
/// owner is free to reject.
pub trait AutomatonModel {
    fn states(&self) -> Vec<StateId>;
    fn transitions(&self) -> Vec<TransKey>;

    fn transitions_from(&self, state: StateId) -> Vec<TransKey> {
        self.transitions()
            .into_iter()
            .filter(|t| t.source == state)
            .collect()
    }

    fn transitions_to(&self, state: StateId) -> Vec<TransKey> {
        self.transitions()
            .into_iter()
            .filter(|t| t.target == state)
            .collect()
    }

    fn initial_states(&self) -> Vec<StateId>;
    fn marked_states(&self) -> Vec<StateId>;

    fn is_initial(&self, state: StateId) -> bool {
        self.initial_states().contains(&state)
    }

    fn is_marked(&self, state: StateId) -> bool {
        self.marked_states().contains(&state)
    }

    fn exists_state(&self, state: StateId) -> bool;
    fn exists_transition(&self, key: &TransKey) -> bool;

    fn state_name(&self, state: StateId) -> Option<String>;
    fn event_name(&self, event: EventId) -> Option<String>;
    fn event_index(&self, name: &str) -> Option<EventId>;

    /// Ask the owner to insert a transition. The owner may pick a different key (for example
    /// to assign an event) or reject the request by returning `None`.
    fn request_insert_transition(&mut self, _proposed: TransKey) -> Option<TransKey> {
        None
    }

    /// Ask the owner to rename a state.
    fn request_rename_state(&mut self, _state: StateId, _name: &str) -> bool {
        false
    }
}

// ============================================================================
// IN-MEMORY AUTOMATON
// ============================================================================

/// Per-state attributes of the in-memory automaton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateInfo {
    pub name: String,
    pub initial: bool,
    pub marked: bool,
}

/// A small in-memory automaton implementing [`AutomatonModel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Automaton {
    /// Name of the automaton
    pub name: String,
    states: BTreeMap<StateId, StateInfo>,
    events: BTreeMap<EventId, String>,
    transitions: BTreeSet<TransKey>,
    /// Event used when an interactive transition is inserted without one
    pub default_event: Option<EventId>,
}

impl Automaton {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Insert a state with the next free index.
    pub fn add_state(&mut self, name: impl Into<String>) -> StateId {
        let id = self.states.keys().next_back().copied().unwrap_or(0) + 1;
        self.insert_state(id, name);
        id
    }

    /// Insert (or rename) a state with a given index.
    pub fn insert_state(&mut self, id: StateId, name: impl Into<String>) {
        if id == 0 {
            return;
        }
        let entry = self.states.entry(id).or_default();
        entry.name = name.into();
    }

    /// Remove a state and every transition touching it.
    pub fn remove_state(&mut self, id: StateId) -> bool {
        if self.states.remove(&id).is_none() {
            return false;
        }
        self.transitions.retain(|t| !t.touches(id));
        true
    }

    /// Intern an event symbol.
    pub fn add_event(&mut self, name: impl Into<String>) -> EventId {
        let name = name.into();
        if let Some(id) = self.event_index(&name) {
            return id;
        }
        let id = self.events.keys().next_back().copied().unwrap_or(0) + 1;
        self.events.insert(id, name);
        id
    }

    pub fn rename_event(&mut self, id: EventId, name: impl Into<String>) -> bool {
        match self.events.get_mut(&id) {
            Some(existing) => {
                *existing = name.into();
                true
            }
            None => false,
        }
    }

    /// Insert a transition; both states and the event must exist.
    pub fn add_transition(&mut self, key: TransKey) -> bool {
        if !self.states.contains_key(&key.source)
            || !self.states.contains_key(&key.target)
            || !self.events.contains_key(&key.event)
        {
            return false;
        }
        self.transitions.insert(key)
    }

    pub fn remove_transition(&mut self, key: &TransKey) -> bool {
        self.transitions.remove(key)
    }

    pub fn set_initial(&mut self, id: StateId, initial: bool) {
        if let Some(state) = self.states.get_mut(&id) {
            state.initial = initial;
        }
    }

    pub fn set_marked(&mut self, id: StateId, marked: bool) {
        if let Some(state) = self.states.get_mut(&id) {
            state.marked = marked;
        }
    }

    pub fn state(&self, id: StateId) -> Option<&StateInfo> {
        self.states.get(&id)
    }

    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| *id)
    }

    pub fn events(&self) -> impl Iterator<Item = (EventId, &str)> {
        self.events.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

impl AutomatonModel for Automaton {
    fn states(&self) -> Vec<StateId> {
        self.states.keys().copied().collect()
    }

    fn transitions(&self) -> Vec<TransKey> {
        self.transitions.iter().copied().collect()
    }

    fn initial_states(&self) -> Vec<StateId> {
        self.states
            .iter()
            .filter(|(_, s)| s.initial)
            .map(|(id, _)| *id)
            .collect()
    }

    fn marked_states(&self) -> Vec<StateId> {
        self.states
            .iter()
            .filter(|(_, s)| s.marked)
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_initial(&self, state: StateId) -> bool {
        self.states.get(&state).is_some_and(|s| s.initial)
    }

    fn is_marked(&self, state: StateId) -> bool {
        self.states.get(&state).is_some_and(|s| s.marked)
    }

    fn exists_state(&self, state: StateId) -> bool {
        self.states.contains_key(&state)
    }

    fn exists_transition(&self, key: &TransKey) -> bool {
        self.transitions.contains(key)
    }

    fn state_name(&self, state: StateId) -> Option<String> {
        self.states.get(&state).map(|s| s.name.clone())
    }

    fn event_name(&self, event: EventId) -> Option<String> {
        self.events.get(&event).cloned()
    }

    fn event_index(&self, name: &str) -> Option<EventId> {
        self.events
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    fn request_insert_transition(&mut self, proposed: TransKey) -> Option<TransKey> {
        let mut key = proposed;
        if key.event == 0 {
            key.event = self.default_event?;
        }
        if self.transitions.contains(&key) {
            return None;
        }
        self.add_transition(key).then_some(key)
    }

    fn request_rename_state(&mut self, state: StateId, name: &str) -> bool {
        if name.is_empty() || self.state_by_name(name).is_some() {
            return false;
        }
        match self.states.get_mut(&state) {
            Some(s) => {
                s.name = name.to_string();
                true
            }
            None => false,
        }
    }
}
