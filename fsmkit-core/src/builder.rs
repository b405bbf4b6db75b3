//! Graph construction.
//!
//! A [`MachineBuilder`] collects nodes, transitions and settings, then builds a
//! [`Machine`] in two phases:
//!
//! 1. every node is created with its state object and raw transition table;
//! 2. [`Machine::complete_initialization`] resolves transition targets by name
//!    and attaches each state object to the machine.
//!
//! Transitions may therefore name nodes declared later. A builder can be built
//! any number of times; states registered with [`MachineBuilder::state`] are
//! created fresh for every machine.

use crate::aspect::{aspect_binder, AspectRef, ASPECT_PROPERTY};
use crate::error::CoreError;
use crate::event::Event;
use crate::internal::InternalEvents;
use crate::machine::Machine;
use crate::node::{Graph, Node};
use crate::state::{NodeState, Params, StateRef};
use crate::transition::{Target, Transition};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type StateFn<E> = Arc<dyn Fn() -> StateRef<E> + Send + Sync>;

/// Where a node's state object comes from.
enum StateSource<E: Event> {
    /// Created on every build.
    Factory(StateFn<E>),
    /// The same object for every build.
    Shared(StateRef<E>),
}

impl<E: Event> StateSource<E> {
    fn instantiate(&self) -> StateRef<E> {
        match self {
            StateSource::Factory(f) => f(),
            StateSource::Shared(state) => state.clone(),
        }
    }
}

impl<E: Event> Clone for StateSource<E> {
    fn clone(&self) -> Self {
        match self {
            StateSource::Factory(f) => StateSource::Factory(f.clone()),
            StateSource::Shared(s) => StateSource::Shared(s.clone()),
        }
    }
}

/// Supplies state objects while a machine is constructed.
pub trait StateFactory<E: Event> {
    /// Returns the state for `node`. `declared` is what the builder itself holds
    /// for that node, if anything.
    fn create(&self, node: &str, declared: Option<StateRef<E>>) -> Option<StateRef<E>>;
}

/// Uses exactly what the builder declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredStates;

impl<E: Event> StateFactory<E> for DeclaredStates {
    fn create(&self, _node: &str, declared: Option<StateRef<E>>) -> Option<StateRef<E>> {
        declared
    }
}

struct NodeDecl<E: Event> {
    name: String,
    source: Option<StateSource<E>>,
}

impl<E: Event> Clone for NodeDecl<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

struct TransitionDecl<E: Event> {
    from: String,
    /// `None` declares the default transition.
    on: Option<E::Symbol>,
    target: Target,
}

impl<E: Event> Clone for TransitionDecl<E> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            on: self.on.clone(),
            target: self.target.clone(),
        }
    }
}

/// Declarative description of a machine.
pub struct MachineBuilder<E: Event> {
    name: String,
    nodes: Vec<NodeDecl<E>>,
    transitions: Vec<TransitionDecl<E>>,
    params: HashMap<String, Params>,
    finals: Vec<String>,
    initial: Option<String>,
    alphabet: Option<HashSet<E::Symbol>>,
    aspect: Option<AspectRef<E>>,
    aspect_required: bool,
    aspects: HashMap<String, AspectRef<E>>,
    internal: InternalEvents,
    properties: Vec<(String, Value)>,
}

impl<E: Event> MachineBuilder<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            transitions: Vec::new(),
            params: HashMap::new(),
            finals: Vec::new(),
            initial: None,
            alphabet: None,
            aspect: None,
            aspect_required: false,
            aspects: HashMap::new(),
            internal: InternalEvents::default(),
            properties: Vec::new(),
        }
    }

    /// Declares a node whose state is created by `factory` on every build.
    pub fn state<S, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        S: NodeState<E>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let factory: StateFn<E> = Arc::new(move || Arc::new(factory()) as StateRef<E>);
        self.nodes.push(NodeDecl {
            name: name.into(),
            source: Some(StateSource::Factory(factory)),
        });
        self
    }

    /// Declares a node whose state is created by a type-erased factory.
    pub fn state_with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> StateRef<E> + Send + Sync + 'static,
    {
        self.nodes.push(NodeDecl {
            name: name.into(),
            source: Some(StateSource::Factory(Arc::new(factory))),
        });
        self
    }

    /// Declares a node backed by an existing state object.
    pub fn shared_state(mut self, name: impl Into<String>, state: StateRef<E>) -> Self {
        self.nodes.push(NodeDecl {
            name: name.into(),
            source: Some(StateSource::Shared(state)),
        });
        self
    }

    /// Declares a node without a state object.
    ///
    /// The [`StateFactory`] used at build time must supply one, as the
    /// reconfiguration factory does by reusing the outgoing machine's states.
    pub fn node(mut self, name: impl Into<String>) -> Self {
        self.nodes.push(NodeDecl {
            name: name.into(),
            source: None,
        });
        self
    }

    /// Adds an initializer parameter handed to the node's `on_attached`.
    pub fn param(mut self, node: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        self.params
            .entry(node.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    pub fn transition(mut self, from: impl Into<String>, on: E::Symbol, target: Target) -> Self {
        self.transitions.push(TransitionDecl {
            from: from.into(),
            on: Some(on),
            target,
        });
        self
    }

    /// Fallback used when `from` has no transition for an event's symbol.
    pub fn default_transition(mut self, from: impl Into<String>, target: Target) -> Self {
        self.transitions.push(TransitionDecl {
            from: from.into(),
            on: None,
            target,
        });
        self
    }

    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    pub fn final_state(mut self, name: impl Into<String>) -> Self {
        self.finals.push(name.into());
        self
    }

    /// Restricts transitions to the given symbols.
    pub fn alphabet(mut self, symbols: impl IntoIterator<Item = E::Symbol>) -> Self {
        self.alphabet = Some(symbols.into_iter().collect());
        self
    }

    /// Sets the active aspect.
    pub fn aspect(mut self, aspect: AspectRef<E>) -> Self {
        self.aspect = Some(aspect);
        self
    }

    /// Registers an aspect that can be selected at runtime through
    /// [`ASPECT_PROPERTY`].
    pub fn register_aspect(mut self, name: impl Into<String>, aspect: AspectRef<E>) -> Self {
        self.aspects.insert(name.into(), aspect);
        self
    }

    /// Fails the build unless an aspect ends up bound.
    pub fn require_aspect(mut self) -> Self {
        self.aspect_required = true;
        self
    }

    pub fn internal_events(mut self, mode: InternalEvents) -> Self {
        self.internal = mode;
        self
    }

    /// Seeds a machine property.
    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.push((key.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all declared nodes, in declaration order.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Builds and fully initializes a machine.
    pub fn build(&self) -> Result<Machine<E>, CoreError> {
        let mut machine = self.construct()?;
        machine.complete_initialization()?;
        Ok(machine)
    }

    /// Runs construction phase one only.
    pub fn construct(&self) -> Result<Machine<E>, CoreError> {
        self.construct_with(&DeclaredStates)
    }

    /// Runs construction phase one, taking state objects from `factory`.
    pub fn construct_with(&self, factory: &dyn StateFactory<E>) -> Result<Machine<E>, CoreError> {
        let initial = self
            .initial
            .as_deref()
            .ok_or_else(|| CoreError::malformed(format!("machine '{}' has no initial state", self.name)))?;

        if self.aspect_required && self.aspect.is_none() && self.aspects.is_empty() {
            return Err(CoreError::malformed(format!(
                "machine '{}' requires an aspect but none was supplied",
                self.name
            )));
        }

        let mut graph = Graph::new();
        for decl in &self.nodes {
            let declared = decl.source.as_ref().map(StateSource::instantiate);
            let state = factory.create(&decl.name, declared).ok_or_else(|| {
                CoreError::malformed(format!("state '{}' has no state object", decl.name))
            })?;
            let params = self.params.get(&decl.name).cloned().unwrap_or_default();
            graph.insert(Node::new(decl.name.clone(), state, params))?;
        }

        for node in self.params.keys() {
            if graph.find(node).is_none() {
                return Err(CoreError::malformed(format!(
                    "parameters given for unknown state '{}'",
                    node
                )));
            }
        }

        for decl in &self.transitions {
            let id = graph.find(&decl.from).ok_or_else(|| {
                CoreError::malformed(format!("transition from unknown state '{}'", decl.from))
            })?;
            let transition = Transition::new(decl.target.clone());
            match &decl.on {
                Some(symbol) => {
                    if let Some(alphabet) = &self.alphabet {
                        if !alphabet.contains(symbol) {
                            return Err(CoreError::malformed(format!(
                                "symbol {:?} used by state '{}' is not in the alphabet",
                                symbol, decl.from
                            )));
                        }
                    }
                    graph.node_mut(id).add_transition(symbol.clone(), transition)?;
                }
                None => graph.node_mut(id).set_default(transition)?,
            }
        }

        for name in &self.finals {
            let id = graph
                .find(name)
                .ok_or_else(|| CoreError::malformed(format!("unknown final state '{}'", name)))?;
            graph.node_mut(id).mark_final();
        }

        let current = graph
            .find(initial)
            .ok_or_else(|| CoreError::malformed(format!("initial state '{}' not declared", initial)))?;

        let mut machine = Machine::from_parts(
            self.name.clone(),
            graph,
            current,
            self.internal,
            self.aspect.clone(),
            self.aspect_required,
            Arc::new(self.aspects.clone()),
        );

        for (key, value) in &self.properties {
            machine.properties_mut().insert_silently(key.clone(), value.clone());
        }

        let listener = aspect_binder(
            machine.aspect_slot(),
            machine.aspect_catalog(),
            self.aspect_required,
        );
        machine
            .properties_mut()
            .add_listener(Some(ASPECT_PROPERTY), listener);

        Ok(machine)
    }
}

impl<E: Event> Clone for MachineBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            transitions: self.transitions.clone(),
            params: self.params.clone(),
            finals: self.finals.clone(),
            initial: self.initial.clone(),
            alphabet: self.alphabet.clone(),
            aspect: self.aspect.clone(),
            aspect_required: self.aspect_required,
            aspects: self.aspects.clone(),
            internal: self.internal,
            properties: self.properties.clone(),
        }
    }
}

impl<E: Event> std::fmt::Debug for MachineBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineBuilder")
            .field("name", &self.name)
            .field("states", &self.nodes.len())
            .field("transitions", &self.transitions.len())
            .field("initial", &self.initial)
            .finish()
    }
}
