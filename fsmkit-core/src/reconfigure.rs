//! Live topology changes.
//!
//! Two flavors exist:
//!
//! - [`Machine::replace_states`] swaps state objects on existing nodes in
//!   place, keeping transitions, position and properties.
//! - [`Machine::reconfigure`] builds a whole new machine from a builder,
//!   reusing the outgoing states by name, then carries the current node name
//!   and every property over. The caller swaps the result in.

use crate::builder::{MachineBuilder, StateFactory};
use crate::error::CoreError;
use crate::event::Event;
use crate::machine::Machine;
use crate::node::NodeId;
use crate::state::StateRef;
use std::collections::HashMap;

/// State source used while rebuilding a machine.
///
/// Priority: explicit replacement, then the outgoing machine's state for a
/// node of the same name, then whatever the builder declares.
struct ReplacementFactory<E: Event> {
    replacements: HashMap<String, StateRef<E>>,
    outgoing: HashMap<String, StateRef<E>>,
}

impl<E: Event> StateFactory<E> for ReplacementFactory<E> {
    fn create(&self, node: &str, declared: Option<StateRef<E>>) -> Option<StateRef<E>> {
        self.replacements
            .get(node)
            .or_else(|| self.outgoing.get(node))
            .cloned()
            .or(declared)
    }
}

impl<E: Event> Machine<E> {
    /// Installs new state objects on existing nodes.
    ///
    /// Every name is checked before anything changes, so an unknown node or a
    /// state that cannot serve the node's custom transitions leaves the
    /// machine untouched. Each installed state gets `on_attached` once the
    /// machine is initialized; the old one gets `on_detached`.
    pub fn replace_states<I>(&mut self, states: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (String, StateRef<E>)>,
    {
        let mut planned = Vec::new();
        for (name, state) in states {
            let id = self
                .graph()
                .find(&name)
                .ok_or(CoreError::UnknownState { name })?;
            self.graph().node(id).check_capabilities(&state)?;
            planned.push((id, state));
        }

        let mut installed = Vec::with_capacity(planned.len());
        for (id, state) in planned {
            let previous = self.graph_mut().node_mut(id).attach_state(state);
            installed.push((id, previous));
            tracing::debug!(
                "machine '{}': replaced state of '{}'",
                self.name(),
                self.graph().node(id).name()
            );
            if self.is_initialized() {
                if let Err(e) = self.attach(id) {
                    self.restore_states(installed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Puts back the states displaced by a failed `replace_states`, newest
    /// first.
    fn restore_states(&mut self, installed: Vec<(NodeId, StateRef<E>)>) {
        for (id, previous) in installed.into_iter().rev() {
            self.graph_mut().node_mut(id).attach_state(previous);
            if self.is_initialized() {
                if let Err(e) = self.attach(id) {
                    tracing::warn!(
                        "machine '{}': restoring state of '{}': {}",
                        self.name(),
                        self.graph().node(id).name(),
                        e
                    );
                }
            }
        }
    }

    /// Builds the successor of this machine from `builder`.
    ///
    /// The successor sits on the node with the same name as this machine's
    /// current node and holds a copy of every property. Listeners registered
    /// on this machine are not carried over.
    pub fn reconfigure(
        &self,
        builder: &MachineBuilder<E>,
        replacements: HashMap<String, StateRef<E>>,
    ) -> Result<Machine<E>, CoreError> {
        let outgoing = self
            .nodes()
            .map(|node| (node.name().to_string(), node.state().clone()))
            .collect();
        let factory = ReplacementFactory {
            replacements,
            outgoing,
        };

        let mut next = builder.construct_with(&factory)?;
        next.seed(self.current_name())?;
        for (key, value) in self.properties().iter() {
            next.properties_mut()
                .insert_silently(key.clone(), value.clone());
        }
        next.complete_initialization()?;

        tracing::info!(
            "machine '{}' reconfigured as '{}' at '{}'",
            self.name(),
            next.name(),
            next.current_name()
        );
        Ok(next)
    }
}
