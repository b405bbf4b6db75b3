//! State callbacks and the machine view handed to them.

use crate::error::{BoxError, CoreError};
use crate::event::Event;
use crate::internal::InternalQueue;
use crate::node::{Graph, NodeId};
use crate::properties::PropertyBag;
use serde_json::Value;
use std::sync::Arc;

/// Initializer parameters and per-node property maps.
pub type Params = serde_json::Map<String, Value>;

/// Shared handle to a state object.
pub type StateRef<E> = Arc<dyn NodeState<E>>;

/// Behavior attached to a node.
///
/// Every callback has an empty default. Callbacks take `&self`; state objects
/// that keep mutable data use interior mutability, since the same object may be
/// observed from other threads through stamped snapshots.
pub trait NodeState<E: Event>: Send + Sync + 'static {
    /// Called after the machine switched to this node.
    fn on_entering(&self, _event: &E, _machine: &mut MachineView<'_, E>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before the machine leaves this node.
    fn on_leaving(&self, _event: &E, _machine: &mut MachineView<'_, E>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when an event has neither a transition nor a default here.
    fn on_invalid_transition(&self, _event: &E, _machine: &mut MachineView<'_, E>) {}

    /// Called once the graph is complete, and again after a state replacement.
    fn on_attached(
        &self,
        _params: &Params,
        _machine: &mut MachineView<'_, E>,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when this object is replaced on its node.
    fn on_detached(&self) {}

    /// Capability used by custom transitions.
    fn as_decider(&self) -> Option<&dyn Decider<E>> {
        None
    }
}

/// Picks the next node for a custom transition.
pub trait Decider<E: Event>: Send + Sync {
    /// Returns the name of the next node, or `None` to stay put.
    fn next_state(&self, event: &E, machine: &MachineView<'_, E>) -> Option<String>;
}

/// A state with no behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopState;

impl<E: Event> NodeState<E> for NoopState {}

/// What a callback can see and do while the machine is dispatching.
pub struct MachineView<'a, E: Event> {
    graph: &'a Graph<E>,
    current: NodeId,
    properties: &'a mut PropertyBag,
    internal: &'a mut InternalQueue<E>,
}

impl<'a, E: Event> MachineView<'a, E> {
    pub(crate) fn new(
        graph: &'a Graph<E>,
        current: NodeId,
        properties: &'a mut PropertyBag,
        internal: &'a mut InternalQueue<E>,
    ) -> Self {
        Self {
            graph,
            current,
            properties,
            internal,
        }
    }

    pub fn current_name(&self) -> &str {
        self.graph.node(self.current).name()
    }

    pub fn current_state(&self) -> &StateRef<E> {
        self.graph.node(self.current).state()
    }

    /// Looks up a sibling state object by node name.
    pub fn state(&self, name: &str) -> Option<&StateRef<E>> {
        self.graph.by_name(name).map(|n| n.state())
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.graph.find(name).is_some()
    }

    pub fn is_final(&self, name: &str) -> bool {
        self.graph.by_name(name).is_some_and(|n| n.is_final())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets a machine property, notifying listeners.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) -> Result<(), CoreError> {
        self.properties.set(key, value)
    }

    /// Queues an internal event, processed before the external transit returns.
    pub fn post(&mut self, event: E) -> Result<(), CoreError> {
        self.internal.post(event)
    }
}
