//! Aspects: hooks invoked around every transition.
//!
//! Five interception points are available. Three of them may veto the
//! transition by returning `false`:
//!
//! | Point | Veto |
//! |-------|------|
//! | `on_transition_start` | yes |
//! | `on_null_transition` | no |
//! | `on_leaving_state` | yes |
//! | `on_entering_state` | yes |
//! | `on_transition_finish` | no |

use crate::error::CoreError;
use crate::event::Event;
use crate::properties::{PropertyChange, PropertyListener};
use crate::state::StateRef;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Property that rebinds the active aspect of a live machine.
///
/// Its value is the name of an aspect registered with the builder, or `null`
/// to disable aspects.
pub const ASPECT_PROPERTY: &str = "fsm.aspect";

/// A node as seen by an aspect.
pub struct NodeRef<'a, E: Event> {
    pub name: &'a str,
    pub state: &'a StateRef<E>,
}

impl<E: Event> Clone for NodeRef<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: Event> Copy for NodeRef<'_, E> {}

/// Interception points that may veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPoint {
    TransitionStart,
    LeavingState,
    EnteringState,
}

/// Cross-cutting behavior around transitions.
pub trait Aspect<E: Event>: Send + Sync + 'static {
    fn on_transition_start(&self, _event: &E, _current: NodeRef<'_, E>) -> bool {
        true
    }

    fn on_null_transition(&self, _event: &E, _current: NodeRef<'_, E>) {}

    fn on_leaving_state(&self, _event: &E, _from: NodeRef<'_, E>, _to: NodeRef<'_, E>) -> bool {
        true
    }

    fn on_entering_state(&self, _event: &E, _from: NodeRef<'_, E>, _to: NodeRef<'_, E>) -> bool {
        true
    }

    fn on_transition_finish(&self, _event: &E, _from: NodeRef<'_, E>, _to: NodeRef<'_, E>) {}
}

pub type AspectRef<E> = Arc<dyn Aspect<E>>;

/// Fans every call out to an ordered list of aspects.
///
/// Veto points stop at the first sub-aspect that vetoes; notification points
/// always reach every sub-aspect.
pub struct CompoundAspect<E: Event> {
    aspects: Vec<AspectRef<E>>,
}

impl<E: Event> CompoundAspect<E> {
    pub fn new(aspects: Vec<AspectRef<E>>) -> Self {
        Self { aspects }
    }

    pub fn push(&mut self, aspect: AspectRef<E>) {
        self.aspects.push(aspect);
    }

    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }
}

impl<E: Event> Aspect<E> for CompoundAspect<E> {
    fn on_transition_start(&self, event: &E, current: NodeRef<'_, E>) -> bool {
        self.aspects
            .iter()
            .all(|a| a.on_transition_start(event, current))
    }

    fn on_null_transition(&self, event: &E, current: NodeRef<'_, E>) {
        for aspect in &self.aspects {
            aspect.on_null_transition(event, current);
        }
    }

    fn on_leaving_state(&self, event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) -> bool {
        self.aspects
            .iter()
            .all(|a| a.on_leaving_state(event, from, to))
    }

    fn on_entering_state(&self, event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) -> bool {
        self.aspects
            .iter()
            .all(|a| a.on_entering_state(event, from, to))
    }

    fn on_transition_finish(&self, event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) {
        for aspect in &self.aspects {
            aspect.on_transition_finish(event, from, to);
        }
    }
}

/// Logs every interception point through `tracing`.
#[derive(Debug, Clone)]
pub struct TracingAspect {
    machine: String,
}

impl TracingAspect {
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
        }
    }
}

impl<E: Event> Aspect<E> for TracingAspect {
    fn on_transition_start(&self, event: &E, current: NodeRef<'_, E>) -> bool {
        tracing::debug!(
            machine = %self.machine,
            state = current.name,
            "transition start on {:?}",
            event.symbol()
        );
        true
    }

    fn on_null_transition(&self, event: &E, current: NodeRef<'_, E>) {
        tracing::trace!(
            machine = %self.machine,
            state = current.name,
            "null transition on {:?}",
            event.symbol()
        );
    }

    fn on_leaving_state(&self, _event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) -> bool {
        tracing::trace!(machine = %self.machine, "leaving '{}' for '{}'", from.name, to.name);
        true
    }

    fn on_entering_state(&self, _event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) -> bool {
        tracing::trace!(machine = %self.machine, "entering '{}' from '{}'", to.name, from.name);
        true
    }

    fn on_transition_finish(&self, event: &E, from: NodeRef<'_, E>, to: NodeRef<'_, E>) {
        tracing::info!(
            machine = %self.machine,
            "{} --{:?}--> {}",
            from.name,
            event.symbol(),
            to.name
        );
    }
}

/// The active aspect of a machine, shared with the rebinding listener.
pub(crate) type AspectSlot<E> = Arc<RwLock<Option<AspectRef<E>>>>;

/// Builds the listener that rebinds `slot` whenever [`ASPECT_PROPERTY`] changes.
pub(crate) fn aspect_binder<E: Event>(
    slot: AspectSlot<E>,
    catalog: Arc<HashMap<String, AspectRef<E>>>,
    required: bool,
) -> PropertyListener {
    Arc::new(move |change: &PropertyChange<'_>| {
        let aspect = resolve_aspect(&catalog, change.new, required)?;
        tracing::debug!("rebinding aspect to {}", change.new);
        *slot.write() = aspect;
        Ok(())
    })
}

/// Maps an [`ASPECT_PROPERTY`] value onto a registered aspect.
pub(crate) fn resolve_aspect<E: Event>(
    catalog: &HashMap<String, AspectRef<E>>,
    value: &Value,
    required: bool,
) -> Result<Option<AspectRef<E>>, CoreError> {
    match value {
        Value::Null if required => Err(CoreError::malformed(
            "this machine requires an aspect, it cannot be cleared",
        )),
        Value::Null => Ok(None),
        Value::String(name) => catalog
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| CoreError::malformed(format!("unknown aspect '{}'", name))),
        other => Err(CoreError::malformed(format!(
            "'{}' must be an aspect name or null, got {}",
            ASPECT_PROPERTY, other
        ))),
    }
}
