//! Nodes and the graph that owns them.

use crate::error::CoreError;
use crate::event::Event;
use crate::state::{Params, StateRef};
use crate::transition::{TargetKind, Transition};
use std::collections::HashMap;

/// Index of a node inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

/// A named vertex: one state object plus its outgoing transitions.
pub struct Node<E: Event> {
    name: String,
    state: StateRef<E>,
    transitions: HashMap<E::Symbol, Transition>,
    default: Option<Transition>,
    is_final: bool,
    params: Params,
}

impl<E: Event> Node<E> {
    pub(crate) fn new(name: String, state: StateRef<E>, params: Params) -> Self {
        Self {
            name,
            state,
            transitions: HashMap::new(),
            default: None,
            is_final: false,
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &StateRef<E> {
        &self.state
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Initializer parameters handed to the state on attachment.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The transition declared for `symbol`, ignoring the default.
    pub fn transition(&self, symbol: &E::Symbol) -> Option<&Transition> {
        self.transitions.get(symbol)
    }

    pub fn default_transition(&self) -> Option<&Transition> {
        self.default.as_ref()
    }

    /// Symbols with an explicit transition.
    pub fn symbols(&self) -> impl Iterator<Item = &E::Symbol> {
        self.transitions.keys()
    }

    /// The transition used for `symbol`: explicit entry first, then the default.
    pub(crate) fn lookup(&self, symbol: &E::Symbol) -> Option<&Transition> {
        self.transitions.get(symbol).or(self.default.as_ref())
    }

    pub(crate) fn add_transition(
        &mut self,
        symbol: E::Symbol,
        transition: Transition,
    ) -> Result<(), CoreError> {
        if self.transitions.contains_key(&symbol) {
            return Err(CoreError::malformed(format!(
                "duplicate transition from '{}' on {:?}",
                self.name, symbol
            )));
        }
        self.transitions.insert(symbol, transition);
        Ok(())
    }

    pub(crate) fn set_default(&mut self, transition: Transition) -> Result<(), CoreError> {
        if self.default.is_some() {
            return Err(CoreError::malformed(format!(
                "duplicate default transition from '{}'",
                self.name
            )));
        }
        self.default = Some(transition);
        Ok(())
    }

    pub(crate) fn mark_final(&mut self) {
        self.is_final = true;
    }

    /// Installs a new state object, detaching the previous one first.
    pub(crate) fn attach_state(&mut self, state: StateRef<E>) -> StateRef<E> {
        self.state.on_detached();
        std::mem::replace(&mut self.state, state)
    }

    /// Resolves every transition against the complete name table.
    pub(crate) fn resolve_transitions(
        &mut self,
        index: &HashMap<String, NodeId>,
    ) -> Result<(), CoreError> {
        let can_decide = self.state.as_decider().is_some();
        for (symbol, transition) in self.transitions.iter_mut() {
            transition.resolve(&self.name, &format!("{:?}", symbol), index, can_decide)?;
        }
        if let Some(default) = self.default.as_mut() {
            default.resolve(&self.name, "default", index, can_decide)?;
        }
        Ok(())
    }

    /// Checks that `candidate` can serve this node's custom transitions.
    pub(crate) fn check_capabilities(&self, candidate: &StateRef<E>) -> Result<(), CoreError> {
        let can_decide = candidate.as_decider().is_some();
        let needs_decider = self
            .transitions
            .values()
            .chain(self.default.iter())
            .any(|t| matches!(t.target().kind(), TargetKind::Custom));
        if needs_decider && !can_decide {
            return Err(CoreError::malformed(format!(
                "state '{}' has custom transitions but the new state cannot decide its successor",
                self.name
            )));
        }
        Ok(())
    }
}

impl<E: Event> std::fmt::Debug for Node<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("transitions", &self.transitions.len())
            .field("has_default", &self.default.is_some())
            .field("is_final", &self.is_final)
            .finish()
    }
}

/// All nodes of a machine, addressable by id and by name.
pub(crate) struct Graph<E: Event> {
    nodes: Vec<Node<E>>,
    index: HashMap<String, NodeId>,
}

impl<E: Event> Graph<E> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, node: Node<E>) -> Result<NodeId, CoreError> {
        if self.index.contains_key(node.name()) {
            return Err(CoreError::malformed(format!(
                "duplicate state '{}'",
                node.name()
            )));
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(node.name().to_string(), id);
        self.nodes.push(node);
        Ok(id)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<E> {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<E> {
        &mut self.nodes[id.0]
    }

    pub(crate) fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&Node<E>> {
        self.find(name).map(|id| self.node(id))
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node<E>> {
        self.nodes.iter()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Phase two of construction: resolve every transition.
    pub(crate) fn resolve_all(&mut self) -> Result<(), CoreError> {
        let index = &self.index;
        for node in self.nodes.iter_mut() {
            node.resolve_transitions(index)?;
        }
        Ok(())
    }
}
