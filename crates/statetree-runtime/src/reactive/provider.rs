#![forbid(unsafe_code)]

//! The `{state, changes}` surface shared by every holder of state.

use statetree_core::Value;

use super::cell::{ChangeFeed, Subscription};

/// Anything that exposes a current value and a change feed.
///
/// Controllers, composites, and [`Traced`](crate::debug::Traced) wrappers
/// all implement this, so a composite can treat a leaf and a nested
/// sub-composite the same way.
pub trait StateProvider {
    /// The current value.
    fn state(&self) -> Value;

    /// Read-only change feed.
    fn changes(&self) -> ChangeFeed;

    /// Subscribe with replay of the current value.
    fn subscribe(&self, observer: impl Fn(&Value) + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.changes().subscribe(observer)
    }
}

impl<P: StateProvider> StateProvider for &P {
    fn state(&self) -> Value {
        (**self).state()
    }

    fn changes(&self) -> ChangeFeed {
        (**self).changes()
    }
}
