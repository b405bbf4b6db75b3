//! # fsmkit-core
//!
//! Transition engine for fsmkit.
//!
//! This crate provides:
//! - Nodes, transitions and two-phase graph construction
//! - The dispatch loop with internal (callback-posted) events
//! - Aspects around every transition
//! - Observable machine properties
//! - Live reconfiguration of states and whole graphs
//! - A JSON definition format
//!
//! A [`Machine`] is not thread-safe on its own; see `fsmkit-runtime` for the
//! concurrent drivers.

pub mod aspect;
pub mod builder;
pub mod definition;
pub mod error;
pub mod event;
pub mod internal;
pub mod machine;
pub mod node;
pub mod properties;
mod reconfigure;
pub mod stamped;
pub mod state;
pub mod transition;

#[cfg(test)]
pub(crate) mod testing;

pub use aspect::{
    Aspect, AspectRef, CompoundAspect, InterceptPoint, NodeRef, TracingAspect, ASPECT_PROPERTY,
};
pub use builder::{DeclaredStates, MachineBuilder, StateFactory};
pub use definition::{MachineDefinition, MachineDefinitionRaw, StateCatalog};
pub use error::{BoxError, CoreError};
pub use event::{Event, Signal, Symbol};
pub use internal::InternalEvents;
pub use machine::{Machine, TransitOutcome};
pub use node::Node;
pub use properties::{ListenerId, PropertyBag, PropertyChange, PropertyListener};
pub use stamped::StampedState;
pub use state::{Decider, MachineView, NodeState, NoopState, Params, StateRef};
pub use transition::{Target, TargetKind, Transition};
