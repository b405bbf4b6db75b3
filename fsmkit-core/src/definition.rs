//! Declarative machine definitions.
//!
//! Machine definitions use a JSON DSL (YAML works too, through any serde
//! front end that produces a `serde_json::Value`):
//!
//! ```json
//! {
//!   "alphabet": ["A", "B", "C"],
//!   "initial": "first",
//!   "internal_events": "single",
//!   "properties": {"fsm.aspect": "tracing"},
//!   "states": [
//!     {"name": "first", "default": {"to": "second"}},
//!     {"name": "second", "state": "audit", "params": {"limit": 3},
//!      "transitions": [
//!        {"on": "A", "to": "third", "properties": {"weight": 2}},
//!        {"on": ["B", "C"], "null": true}
//!      ]},
//!     {"name": "third", "final": true}
//!   ]
//! }
//! ```
//!
//! The `state` key names an entry of a [`StateCatalog`]; nodes without one get
//! a [`NoopState`]. Symbols are parsed with `FromStr` when the definition is
//! turned into a builder.

use crate::aspect::AspectRef;
use crate::builder::MachineBuilder;
use crate::error::CoreError;
use crate::event::Event;
use crate::internal::InternalEvents;
use crate::state::{NoopState, NodeState, Params, StateRef};
use crate::transition::{Target, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Where a declared transition leads. Exactly one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub null: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub custom: bool,

    /// Free-form data attached to the transition.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub properties: Params,
}

impl TargetRaw {
    fn kind(&self, owner: &str) -> Result<TargetKind, CoreError> {
        match (&self.to, self.null, self.custom) {
            (Some(to), false, false) => Ok(TargetKind::Node(to.clone())),
            (None, true, false) => Ok(TargetKind::Null),
            (None, false, true) => Ok(TargetKind::Custom),
            _ => Err(CoreError::malformed(format!(
                "transition from '{}' must set exactly one of 'to', 'null' or 'custom'",
                owner
            ))),
        }
    }

    fn target(&self, owner: &str) -> Result<Target, CoreError> {
        let mut target = Target::from_kind(self.kind(owner)?);
        for (key, value) in &self.properties {
            target = target.with_property(key.clone(), value.clone());
        }
        Ok(target)
    }
}

/// A transition keyed by one or more symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRaw {
    /// Symbol literal(s). Can be a single string or an array.
    #[serde(deserialize_with = "deserialize_symbols")]
    pub on: Vec<String>,

    #[serde(flatten)]
    pub target: TargetRaw,
}

fn deserialize_symbols<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct SymbolsVisitor;

    impl<'de> Visitor<'de> for SymbolsVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut symbols = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                symbols.push(s);
            }
            Ok(symbols)
        }
    }

    deserializer.deserialize_any(SymbolsVisitor)
}

/// One node of a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRaw {
    pub name: String,

    /// Catalog key of the state object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Initializer parameters.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,

    #[serde(default, rename = "final", skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TargetRaw>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionRaw>,
}

/// Raw machine definition as stored/transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDefinitionRaw {
    /// Symbols the machine accepts. Unrestricted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphabet: Option<Vec<String>>,

    pub initial: String,

    pub states: Vec<StateRaw>,

    #[serde(default)]
    pub internal_events: InternalEvents,

    /// Seed properties of every machine built from this definition.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub properties: Params,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_aspect: bool,
}

type CatalogFn<E> = Arc<dyn Fn() -> StateRef<E> + Send + Sync>;

/// Named state and aspect implementations a definition can refer to.
pub struct StateCatalog<E: Event> {
    states: HashMap<String, CatalogFn<E>>,
    aspects: HashMap<String, AspectRef<E>>,
}

impl<E: Event> StateCatalog<E> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            aspects: HashMap::new(),
        }
    }

    /// Registers a state type; each node using it gets a fresh object per build.
    pub fn register<S, F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        S: NodeState<E>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let factory: CatalogFn<E> = Arc::new(move || Arc::new(factory()) as StateRef<E>);
        self.states.insert(key.into(), factory);
        self
    }

    pub fn register_aspect(mut self, key: impl Into<String>, aspect: AspectRef<E>) -> Self {
        self.aspects.insert(key.into(), aspect);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.states.contains_key(key)
    }
}

impl<E: Event> Default for StateCatalog<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated machine definition.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    pub name: String,

    /// Original raw definition.
    pub raw: MachineDefinitionRaw,

    /// Hash of the definition for integrity checks.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(name: impl Into<String>, json: &serde_json::Value) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(name, raw)
    }

    /// Validates the graph structure of a raw definition.
    ///
    /// Symbol literals are only checked against the declared alphabet here;
    /// parsing them into typed symbols happens in [`Self::to_builder`].
    pub fn from_raw(name: impl Into<String>, raw: MachineDefinitionRaw) -> Result<Self, CoreError> {
        let name = name.into();

        let mut states = HashSet::new();
        for state in &raw.states {
            if !states.insert(state.name.as_str()) {
                return Err(CoreError::malformed(format!("duplicate state '{}'", state.name)));
            }
        }

        if !states.contains(raw.initial.as_str()) {
            return Err(CoreError::malformed(format!(
                "initial state '{}' not in states list",
                raw.initial
            )));
        }

        let alphabet: Option<HashSet<&str>> = raw
            .alphabet
            .as_ref()
            .map(|a| a.iter().map(String::as_str).collect());

        for state in &raw.states {
            let targets = state
                .transitions
                .iter()
                .map(|t| &t.target)
                .chain(state.default.iter());
            for target in targets {
                if let TargetKind::Node(to) = target.kind(&state.name)? {
                    if !states.contains(to.as_str()) {
                        return Err(CoreError::malformed(format!(
                            "transition target '{}' not in states list",
                            to
                        )));
                    }
                }
            }

            let mut seen = HashSet::new();
            for symbol in state.transitions.iter().flat_map(|t| t.on.iter()) {
                if !seen.insert(symbol.as_str()) {
                    return Err(CoreError::malformed(format!(
                        "duplicate transition from '{}' on event '{}'",
                        state.name, symbol
                    )));
                }
                if let Some(alphabet) = &alphabet {
                    if !alphabet.contains(symbol.as_str()) {
                        return Err(CoreError::malformed(format!(
                            "symbol '{}' used by state '{}' is not in the alphabet",
                            symbol, state.name
                        )));
                    }
                }
            }
        }

        // Compute checksum
        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            name,
            raw,
            checksum,
        })
    }

    /// Returns true if the definition declares `state`.
    pub fn has_state(&self, state: &str) -> bool {
        self.raw.states.iter().any(|s| s.name == state)
    }

    /// Returns all symbols with an explicit transition from `state`.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        self.raw
            .states
            .iter()
            .filter(|s| s.name == state)
            .flat_map(|s| s.transitions.iter())
            .flat_map(|t| t.on.iter().map(String::as_str))
            .collect()
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }

    /// Turns the definition into a builder for event type `E`.
    pub fn to_builder<E>(&self, catalog: &StateCatalog<E>) -> Result<MachineBuilder<E>, CoreError>
    where
        E: Event,
        E::Symbol: FromStr,
    {
        let raw = &self.raw;
        let mut builder = MachineBuilder::new(self.name.clone())
            .initial(raw.initial.clone())
            .internal_events(raw.internal_events);

        if let Some(alphabet) = &raw.alphabet {
            let symbols = alphabet
                .iter()
                .map(|s| parse_symbol::<E>(s))
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.alphabet(symbols);
        }

        for state in &raw.states {
            builder = match &state.state {
                Some(key) => {
                    let factory = catalog.states.get(key).cloned().ok_or_else(|| {
                        CoreError::malformed(format!(
                            "state '{}' refers to unknown catalog entry '{}'",
                            state.name, key
                        ))
                    })?;
                    builder.state_with(state.name.clone(), move || factory())
                }
                None => builder.state(state.name.clone(), || NoopState),
            };

            for (key, value) in &state.params {
                builder = builder.param(state.name.clone(), key.clone(), value.clone());
            }
            if state.is_final {
                builder = builder.final_state(state.name.clone());
            }
            if let Some(default) = &state.default {
                builder = builder.default_transition(state.name.clone(), default.target(&state.name)?);
            }
            for transition in &state.transitions {
                let target = transition.target.target(&state.name)?;
                for literal in &transition.on {
                    builder = builder.transition(
                        state.name.clone(),
                        parse_symbol::<E>(literal)?,
                        target.clone(),
                    );
                }
            }
        }

        for (key, aspect) in &catalog.aspects {
            builder = builder.register_aspect(key.clone(), aspect.clone());
        }
        for (key, value) in &raw.properties {
            builder = builder.property(key.clone(), value.clone());
        }
        if raw.require_aspect {
            builder = builder.require_aspect();
        }

        Ok(builder)
    }
}

fn parse_symbol<E>(literal: &str) -> Result<E::Symbol, CoreError>
where
    E: Event,
    E::Symbol: FromStr,
{
    literal
        .parse()
        .map_err(|_| CoreError::malformed(format!("unresolvable symbol literal '{}'", literal)))
}
