//! Events and their alphabet symbols.

use std::fmt::Debug;
use std::hash::Hash;

/// A member of a machine's finite alphabet.
///
/// Implemented automatically for any cloneable, hashable, thread-safe type.
/// Enums are the usual choice; `String` works when the alphabet is only known
/// at runtime (declarative definitions).
pub trait Symbol: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Symbol for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// An event dispatched to a machine.
///
/// Concrete event types may carry any payload; the engine only looks at the
/// symbol.
pub trait Event: Send + 'static {
    type Symbol: Symbol;

    /// Returns the alphabet symbol of this event.
    fn symbol(&self) -> Self::Symbol;
}

/// A payload-free event carrying just a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signal<S>(pub S);

impl<S: Symbol> Event for Signal<S> {
    type Symbol = S;

    fn symbol(&self) -> S {
        self.0.clone()
    }
}

impl<S> From<S> for Signal<S> {
    fn from(symbol: S) -> Self {
        Signal(symbol)
    }
}
