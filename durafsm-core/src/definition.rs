//! Machine definitions.
//!
//! A machine is a fixed table of states and transitions built once at
//! startup, either in code through [`MachineBuilder`] or from a JSON/YAML
//! document:
//!
//! ```json
//! {
//!   "name": "document_review",
//!   "initial": "initial",
//!   "states": [
//!     "initial",
//!     {"name": "uploaded", "on_entry": ["notifyReviewer"]},
//!     {"name": "processing", "on_entry": ["summarize"], "on_exit": ["archive"]},
//!     {"name": "approved", "on_entry": ["notifyUploader"]}
//!   ],
//!   "transitions": [
//!     {"trigger": "upload", "source": "initial", "destination": "uploaded"},
//!     {"trigger": "approve", "source": "uploaded", "destination": "processing", "guard": "payload.long"},
//!     {"trigger": "approve", "source": "uploaded", "destination": "approved", "unless": "payload.long"},
//!     {"trigger": "processed", "source": "processing", "destination": "approved"}
//!   ]
//! }
//! ```
//!
//! Several transitions may share a `(source, trigger)` pair. They are tried
//! in declaration order and the first whose guards all pass is taken.

use crate::error::CoreError;
use crate::guard::{Guard, GuardExpr, Unless};
use crate::instance::Instance;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A state and the tasks fired when entering or leaving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<String>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
        }
    }

    pub fn on_entry<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_entry.extend(tasks.into_iter().map(Into::into));
        self
    }

    pub fn on_exit<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_exit.extend(tasks.into_iter().map(Into::into));
        self
    }
}

/// A guarded edge between two states.
#[derive(Clone)]
pub struct TransitionDefinition {
    pub trigger: String,
    pub source: String,
    pub destination: String,
    /// All must pass. Empty means the transition is unconditional.
    guards: Vec<Arc<dyn Guard>>,
}

impl TransitionDefinition {
    pub fn new(
        trigger: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            source: source.into(),
            destination: destination.into(),
            guards: Vec::new(),
        }
    }

    /// Requires `guard` to pass.
    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Requires `guard` to fail.
    pub fn unless(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(Unless(guard)));
        self
    }

    pub fn is_guarded(&self) -> bool {
        !self.guards.is_empty()
    }

    /// Human-readable form of each guard.
    pub fn guard_descriptions(&self) -> Vec<String> {
        self.guards.iter().map(|g| g.describe()).collect()
    }

    /// Evaluates every guard against the instance and payload.
    pub fn permits(&self, instance: &Instance, payload: &Value) -> bool {
        self.guards.iter().all(|g| g.check(instance, payload))
    }
}

impl fmt::Debug for TransitionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDefinition")
            .field("trigger", &self.trigger)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("guards", &self.guard_descriptions())
            .finish()
    }
}

/// A state entry in a definition document: a bare name or a full object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawState {
    Name(String),
    Full(StateDefinition),
}

/// A transition entry in a definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTransition {
    pub trigger: String,
    /// One state name or a list of them.
    #[serde(deserialize_with = "one_or_many")]
    pub source: Vec<String>,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

fn default_machine_name() -> String {
    "machine".to_string()
}

/// Machine definition document, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDefinitionRaw {
    #[serde(default = "default_machine_name")]
    pub name: String,
    pub initial: String,
    pub states: Vec<RawState>,
    #[serde(default)]
    pub transitions: Vec<RawTransition>,
}

/// Assembles a [`MachineDefinition`] in code.
#[derive(Debug)]
pub struct MachineBuilder {
    name: String,
    initial: Option<String>,
    states: Vec<StateDefinition>,
    transitions: Vec<TransitionDefinition>,
}

impl MachineBuilder {
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    pub fn state(mut self, state: StateDefinition) -> Self {
        self.states.push(state);
        self
    }

    pub fn transition(mut self, transition: TransitionDefinition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Validates and indexes the table.
    pub fn build(self) -> Result<MachineDefinition, CoreError> {
        let invalid = |reason: String| CoreError::InvalidDefinition { reason };

        if self.states.is_empty() {
            return Err(invalid("machine has no states".to_string()));
        }

        let mut state_index = HashMap::with_capacity(self.states.len());
        for (i, state) in self.states.iter().enumerate() {
            if state.name.trim().is_empty() {
                return Err(invalid("state name must not be empty".to_string()));
            }
            if state_index.insert(state.name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate state '{}'", state.name)));
            }
            if state.on_entry.iter().chain(&state.on_exit).any(|t| t.trim().is_empty()) {
                return Err(invalid(format!(
                    "state '{}' lists an empty task name",
                    state.name
                )));
            }
        }

        let initial = self
            .initial
            .ok_or_else(|| invalid("no initial state".to_string()))?;
        if !state_index.contains_key(&initial) {
            return Err(invalid(format!("initial state '{}' is not defined", initial)));
        }

        let mut routes: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (i, t) in self.transitions.iter().enumerate() {
            if t.trigger.trim().is_empty() {
                return Err(invalid(format!(
                    "transition from '{}' has an empty trigger",
                    t.source
                )));
            }
            for end in [&t.source, &t.destination] {
                if !state_index.contains_key(end) {
                    return Err(invalid(format!(
                        "transition '{}' references undefined state '{}'",
                        t.trigger, end
                    )));
                }
            }
            routes
                .entry((t.source.clone(), t.trigger.clone()))
                .or_default()
                .push(i);
        }

        Ok(MachineDefinition {
            name: self.name,
            initial,
            states: self.states,
            state_index,
            transitions: self.transitions,
            routes,
        })
    }
}

/// A validated, indexed state machine.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    name: String,
    initial: String,
    states: Vec<StateDefinition>,
    state_index: HashMap<String, usize>,
    transitions: Vec<TransitionDefinition>,
    /// (source, trigger) -> transition indices in declaration order.
    routes: HashMap<(String, String), Vec<usize>>,
}

impl MachineDefinition {
    pub fn builder(name: impl Into<String>) -> MachineBuilder {
        MachineBuilder {
            name: name.into(),
            initial: None,
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Validates a definition document. Guard strings are parsed here, so a
    /// bad expression fails the load rather than the first transition.
    pub fn from_raw(raw: MachineDefinitionRaw) -> Result<Self, CoreError> {
        let mut builder = Self::builder(raw.name).initial(raw.initial);
        for state in raw.states {
            builder = builder.state(match state {
                RawState::Name(name) => StateDefinition::new(name),
                RawState::Full(def) => def,
            });
        }

        for t in raw.transitions {
            let guard = t.guard.as_deref().map(GuardExpr::parse).transpose()?;
            let unless = t.unless.as_deref().map(GuardExpr::parse).transpose()?;
            if t.source.is_empty() {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("transition '{}' has no source state", t.trigger),
                });
            }
            for source in &t.source {
                let mut def = TransitionDefinition::new(&t.trigger, source, &t.destination);
                if let Some(g) = &guard {
                    def = def.guard(g.clone());
                }
                if let Some(u) = &unless {
                    def = def.unless(u.clone());
                }
                builder = builder.transition(def);
            }
        }

        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> &StateDefinition {
        &self.states[self.state_index[&self.initial]]
    }

    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.state_index.get(name).map(|&i| &self.states[i])
    }

    pub fn states(&self) -> &[StateDefinition] {
        &self.states
    }

    pub fn transitions(&self) -> &[TransitionDefinition] {
        &self.transitions
    }

    /// Transitions leaving `source` on `trigger`, in declaration order.
    pub fn candidates<'a>(
        &'a self,
        source: &str,
        trigger: &str,
    ) -> impl Iterator<Item = &'a TransitionDefinition> + 'a {
        self.routes
            .get(&(source.to_string(), trigger.to_string()))
            .into_iter()
            .flatten()
            .map(move |&i| &self.transitions[i])
    }

    /// Triggers accepted from `state`, in declaration order.
    pub fn triggers_from(&self, state: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.transitions
            .iter()
            .filter(|t| t.source == state && seen.insert(t.trigger.as_str()))
            .map(|t| t.trigger.as_str())
            .collect()
    }

    /// Every task name any state may fire.
    pub fn task_names(&self) -> BTreeSet<&str> {
        self.states
            .iter()
            .flat_map(|s| s.on_entry.iter().chain(&s.on_exit))
            .map(String::as_str)
            .collect()
    }
}
