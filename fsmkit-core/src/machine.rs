//! The machine driver and its dispatch loop.
//!
//! A [`Machine`] is single-threaded: it owns its graph, its current node and
//! its property bag. The concurrent drivers in `fsmkit-runtime` serialize
//! access to it.
//!
//! One call to [`Machine::transit`] runs:
//!
//! 1. the aspect's transition-start hook (veto aborts everything);
//! 2. a loop over pending events, starting with the external one:
//!    resolve the target, then either the null-transition hook, or
//!    leave-veto, `on_leaving`, enter-veto, pointer switch, `on_entering`,
//!    finish hook;
//! 3. internal events posted by callbacks are appended and drained in order
//!    before the call returns.
//!
//! The current-node pointer moves only after both the leave and the enter veto
//! points have passed, so a veto never leaves the machine on a node whose
//! `on_entering` did not run.

use crate::aspect::{
    resolve_aspect, AspectRef, AspectSlot, InterceptPoint, NodeRef, ASPECT_PROPERTY,
};
use crate::error::{BoxError, CoreError};
use crate::event::Event;
use crate::internal::{InternalEvents, InternalQueue};
use crate::node::{Graph, Node, NodeId};
use crate::properties::{ListenerId, PropertyBag, PropertyListener};
use crate::stamped::StampedState;
use crate::state::{MachineView, NodeState, StateRef};
use crate::transition::Step;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// How a transit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitOutcome {
    /// Every pending event was processed.
    Settled { processed: usize },
    /// An aspect vetoed. Steps committed before the veto stay committed.
    Vetoed { point: InterceptPoint },
}

impl TransitOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, TransitOutcome::Settled { .. })
    }
}

/// A state machine instance.
pub struct Machine<E: Event> {
    name: String,
    graph: Graph<E>,
    current: NodeId,
    properties: PropertyBag,
    internal: InternalQueue<E>,
    aspect: AspectSlot<E>,
    aspect_required: bool,
    aspects: Arc<HashMap<String, AspectRef<E>>>,
    initialized: bool,
}

impl<E: Event> Machine<E> {
    pub(crate) fn from_parts(
        name: String,
        graph: Graph<E>,
        current: NodeId,
        internal: InternalEvents,
        aspect: Option<AspectRef<E>>,
        aspect_required: bool,
        aspects: Arc<HashMap<String, AspectRef<E>>>,
    ) -> Self {
        Self {
            name,
            graph,
            current,
            properties: PropertyBag::new(),
            internal: InternalQueue::new(internal),
            aspect: Arc::new(RwLock::new(aspect)),
            aspect_required,
            aspects,
            initialized: false,
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Phase two of construction.
    ///
    /// Resolves every transition against the complete set of nodes, binds the
    /// aspect named by [`ASPECT_PROPERTY`] if present, then calls `on_attached`
    /// on every state in declaration order. Calling it again is a no-op.
    pub fn complete_initialization(&mut self) -> Result<(), CoreError> {
        if self.initialized {
            return Ok(());
        }

        self.graph.resolve_all()?;

        if let Some(value) = self.properties.get(ASPECT_PROPERTY) {
            let aspect = resolve_aspect(&self.aspects, value, self.aspect_required)?;
            *self.aspect.write() = aspect;
        }
        if self.aspect_required && self.aspect.read().is_none() {
            return Err(CoreError::malformed(format!(
                "machine '{}' requires an aspect but none is bound",
                self.name
            )));
        }

        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            self.attach(id)?;
        }

        self.properties.enable_notifications();
        self.initialized = true;

        tracing::debug!(
            "machine '{}' initialized with {} states, current '{}'",
            self.name,
            self.graph.nodes().count(),
            self.current_name()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Runs `on_attached` for one node.
    pub(crate) fn attach(&mut self, id: NodeId) -> Result<(), CoreError> {
        let params = self.graph.node(id).params();
        call_state(
            &self.graph,
            self.current,
            &mut self.properties,
            &mut self.internal,
            id,
            |state, view| state.on_attached(params, view),
        )
        .map_err(|e| {
            CoreError::malformed(format!(
                "attaching state '{}' failed: {}",
                self.graph.node(id).name(),
                e
            ))
        })
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches an external event and every internal event it causes.
    ///
    /// On error the machine stays on the last committed node and pending
    /// internal events are discarded.
    pub fn transit(&mut self, event: E) -> Result<TransitOutcome, CoreError> {
        if !self.initialized {
            return Err(CoreError::NotInitialized);
        }

        let aspect = self.active_aspect();
        if let Some(aspect) = &aspect {
            let current = self.node_ref(self.current);
            if !call_aspect(current.name, || aspect.on_transition_start(&event, current))? {
                tracing::warn!(
                    "machine '{}': transition vetoed at start in '{}'",
                    self.name,
                    self.current_name()
                );
                return Ok(TransitOutcome::Vetoed {
                    point: InterceptPoint::TransitionStart,
                });
            }
        }

        self.internal.begin(event);
        let result = self.drain();
        let dropped = self.internal.finish();
        if dropped > 0 {
            tracing::debug!(
                "machine '{}': discarded {} pending internal event(s)",
                self.name,
                dropped
            );
        }
        result
    }

    fn drain(&mut self) -> Result<TransitOutcome, CoreError> {
        let mut processed = 0;
        while let Some(event) = self.internal.next() {
            if processed > 0 {
                tracing::trace!(
                    "machine '{}': internal event {:?}",
                    self.name,
                    event.symbol()
                );
            }
            processed += 1;
            if let Some(point) = self.step(&event)? {
                tracing::warn!(
                    "machine '{}': transition vetoed at {:?} in '{}'",
                    self.name,
                    point,
                    self.current_name()
                );
                return Ok(TransitOutcome::Vetoed { point });
            }
        }
        Ok(TransitOutcome::Settled { processed })
    }

    /// Processes one event. Returns the veto point if an aspect vetoed.
    fn step(&mut self, event: &E) -> Result<Option<InterceptPoint>, CoreError> {
        let from = self.current;
        let target = self.resolve(from, event)?;
        let aspect = self.active_aspect();

        let Some(to) = target else {
            if let Some(aspect) = &aspect {
                let here = self.node_ref(from);
                call_aspect(here.name, || aspect.on_null_transition(event, here))?;
            }
            tracing::trace!(
                "machine '{}': null transition in '{}' on {:?}",
                self.name,
                self.graph.node(from).name(),
                event.symbol()
            );
            return Ok(None);
        };

        if let Some(aspect) = &aspect {
            let (source, dest) = (self.node_ref(from), self.node_ref(to));
            if !call_aspect(source.name, || aspect.on_leaving_state(event, source, dest))? {
                return Ok(Some(InterceptPoint::LeavingState));
            }
        }

        call_state(
            &self.graph,
            self.current,
            &mut self.properties,
            &mut self.internal,
            from,
            |state, view| state.on_leaving(event, view),
        )?;

        if let Some(aspect) = &aspect {
            let (source, dest) = (self.node_ref(from), self.node_ref(to));
            if !call_aspect(dest.name, || aspect.on_entering_state(event, source, dest))? {
                return Ok(Some(InterceptPoint::EnteringState));
            }
        }

        self.current = to;
        let entered = call_state(
            &self.graph,
            self.current,
            &mut self.properties,
            &mut self.internal,
            to,
            |state, view| state.on_entering(event, view),
        );
        if let Err(e) = entered {
            self.current = from;
            return Err(e);
        }

        if let Some(aspect) = &aspect {
            let (source, dest) = (self.node_ref(from), self.node_ref(to));
            let finished =
                call_aspect(dest.name, || aspect.on_transition_finish(event, source, dest));
            if let Err(e) = finished {
                self.current = from;
                return Err(e);
            }
        }

        tracing::debug!(
            "machine '{}': {} --{:?}--> {}",
            self.name,
            self.graph.node(from).name(),
            event.symbol(),
            self.graph.node(to).name()
        );
        Ok(None)
    }

    /// Resolves the target of `event` from `from`. `None` means stay.
    fn resolve(&mut self, from: NodeId, event: &E) -> Result<Option<NodeId>, CoreError> {
        let node = self.graph.node(from);
        let symbol = event.symbol();

        match node.lookup(&symbol).and_then(|t| t.step()) {
            Some(Step::Move(id)) => Ok(Some(id)),
            Some(Step::Stay) => Ok(None),
            Some(Step::Decide) => {
                let decider = node.state().as_decider().ok_or_else(|| {
                    CoreError::malformed(format!(
                        "state '{}' cannot decide its successor",
                        node.name()
                    ))
                })?;
                let view = MachineView::new(
                    &self.graph,
                    self.current,
                    &mut self.properties,
                    &mut self.internal,
                );
                let choice = panic::catch_unwind(AssertUnwindSafe(|| {
                    decider.next_state(event, &view)
                }))
                .map_err(|payload| CoreError::Callback {
                    state: node.name().to_string(),
                    source: panic_message(payload).into(),
                })?;

                match choice {
                    None => Ok(None),
                    Some(name) => {
                        self.graph
                            .find(&name)
                            .map(Some)
                            .ok_or_else(|| CoreError::UnknownTarget {
                                state: node.name().to_string(),
                                target: name,
                            })
                    }
                }
            }
            None => {
                let invalid = call_state(
                    &self.graph,
                    self.current,
                    &mut self.properties,
                    &mut self.internal,
                    from,
                    |state, view| {
                        state.on_invalid_transition(event, view);
                        Ok(())
                    },
                );
                if let Err(e) = invalid {
                    tracing::warn!("machine '{}': {}", self.name, e);
                }
                Err(CoreError::InvalidEvent {
                    state: node.name().to_string(),
                    event: format!("{:?}", symbol),
                })
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_name(&self) -> &str {
        self.graph.node(self.current).name()
    }

    pub fn current_state(&self) -> &StateRef<E> {
        self.graph.node(self.current).state()
    }

    /// Returns true if the current node is final.
    pub fn is_final(&self) -> bool {
        self.graph.node(self.current).is_final()
    }

    pub fn node(&self, name: &str) -> Option<&Node<E>> {
        self.graph.by_name(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<E>> {
        self.graph.nodes()
    }

    /// Looks up a state object by node name.
    pub fn state(&self, name: &str) -> Option<&StateRef<E>> {
        self.graph.by_name(name).map(|n| n.state())
    }

    pub fn internal_events(&self) -> InternalEvents {
        self.internal.mode()
    }

    /// Snapshots the current state with the given generation.
    pub fn stamp(&self, generation: u64) -> StampedState<E> {
        StampedState::new(self.current_name(), self.current_state().clone(), generation)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Sets a property. Listeners are notified once the machine is initialized.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) -> Result<(), CoreError> {
        self.properties.set(key, value)
    }

    /// Registers a listener for `key`, or for every key when `None`.
    pub fn add_listener(&mut self, key: Option<&str>, listener: PropertyListener) -> ListenerId {
        self.properties.add_listener(key, listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.properties.remove_listener(id)
    }

    pub(crate) fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    // =========================================================================
    // Aspects
    // =========================================================================

    pub fn aspect(&self) -> Option<AspectRef<E>> {
        self.active_aspect()
    }

    /// Replaces the active aspect directly.
    pub fn set_aspect(&mut self, aspect: Option<AspectRef<E>>) -> Result<(), CoreError> {
        if aspect.is_none() && self.aspect_required {
            return Err(CoreError::malformed(format!(
                "machine '{}' requires an aspect, it cannot be cleared",
                self.name
            )));
        }
        *self.aspect.write() = aspect;
        Ok(())
    }

    pub(crate) fn aspect_slot(&self) -> AspectSlot<E> {
        self.aspect.clone()
    }

    pub(crate) fn aspect_catalog(&self) -> Arc<HashMap<String, AspectRef<E>>> {
        self.aspects.clone()
    }

    fn active_aspect(&self) -> Option<AspectRef<E>> {
        self.aspect.read().clone()
    }

    fn node_ref(&self, id: NodeId) -> NodeRef<'_, E> {
        let node = self.graph.node(id);
        NodeRef {
            name: node.name(),
            state: node.state(),
        }
    }

    // =========================================================================
    // Reconfiguration support
    // =========================================================================

    pub(crate) fn graph(&self) -> &Graph<E> {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut Graph<E> {
        &mut self.graph
    }

    /// Moves the current pointer to `name` without callbacks.
    pub(crate) fn seed(&mut self, name: &str) -> Result<(), CoreError> {
        self.current = self.graph.find(name).ok_or_else(|| CoreError::UnknownState {
            name: name.to_string(),
        })?;
        Ok(())
    }
}

impl<E: Event> std::fmt::Debug for Machine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("current", &self.current_name())
            .field("initialized", &self.initialized)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Invokes a callback on the state of node `id`, converting errors and panics.
fn call_state<E, F>(
    graph: &Graph<E>,
    current: NodeId,
    properties: &mut PropertyBag,
    internal: &mut InternalQueue<E>,
    id: NodeId,
    f: F,
) -> Result<(), CoreError>
where
    E: Event,
    F: FnOnce(&dyn NodeState<E>, &mut MachineView<'_, E>) -> Result<(), BoxError>,
{
    let node = graph.node(id);
    let mut view = MachineView::new(graph, current, properties, internal);
    let state = node.state().as_ref();

    match panic::catch_unwind(AssertUnwindSafe(|| f(state, &mut view))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(CoreError::Callback {
            state: node.name().to_string(),
            source,
        }),
        Err(payload) => Err(CoreError::Callback {
            state: node.name().to_string(),
            source: panic_message(payload).into(),
        }),
    }
}

/// Invokes an aspect hook, converting a panic into a callback error
/// attributed to `node`.
fn call_aspect<R>(node: &str, f: impl FnOnce() -> R) -> Result<R, CoreError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| CoreError::Callback {
        state: node.to_string(),
        source: format!("aspect {}", panic_message(payload)).into(),
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
