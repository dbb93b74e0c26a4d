#![forbid(unsafe_code)]

//! Debug tap: forward every state change of a provider to a sink.
//!
//! [`debug`] wraps any [`StateProvider`] in a [`Traced`] value that still
//! behaves like the provider (it derefs to it and implements the trait)
//! while observing its change feed. The tap registers without replay, so
//! the sink sees changes only, never the value current at wrap time.
//!
//! [`debug_factory`] does the same one level up: every child the factory
//! builds is wrapped before the composite sees it, and nested maps are
//! walked so leaves at any depth are tapped.
//!
//! ```ignore
//! let counter = debug(def.build(), DebugSink::verbose());
//! counter.invoke("increment")?; // logs `debug.state_change`
//! ```

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use statetree_core::Value;

use crate::reactive::{ChangeFeed, Child, Factory, FactoryContext, StateProvider, Subscription};

/// Receiver for tapped state changes.
#[derive(Clone)]
pub struct DebugSink {
    state_change: Rc<dyn Fn(&Value)>,
}

impl DebugSink {
    pub fn new(state_change: impl Fn(&Value) + 'static) -> Self {
        Self {
            state_change: Rc::new(state_change),
        }
    }

    /// Discards everything. This is the default.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    /// Emits a `debug.state_change` event per change.
    #[must_use]
    pub fn verbose() -> Self {
        Self::new(|value| tracing::debug!(message = "debug.state_change", value = %value))
    }

    pub fn state_change(&self, value: &Value) {
        (self.state_change)(value);
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DebugSink")
    }
}

/// A provider with a debug tap attached.
///
/// Dropping the wrapper (or calling [`detach`](Self::detach)) removes the
/// tap; the wrapped provider is unaffected.
pub struct Traced<P> {
    inner: P,
    tap: Subscription,
}

impl<P: StateProvider> Traced<P> {
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Remove the tap and return the provider.
    pub fn into_inner(self) -> P {
        self.inner
    }

    /// Stop forwarding while keeping the wrapper.
    pub fn detach(&mut self) {
        self.tap.unsubscribe();
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tap.is_active()
    }
}

impl<P> Deref for Traced<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.inner
    }
}

impl<P: StateProvider> StateProvider for Traced<P> {
    fn state(&self) -> Value {
        self.inner.state()
    }

    fn changes(&self) -> ChangeFeed {
        self.inner.changes()
    }
}

impl<P: fmt::Debug> fmt::Debug for Traced<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traced")
            .field("inner", &self.inner)
            .field("attached", &self.tap.is_active())
            .finish()
    }
}

/// Attach `sink` to every change `provider` emits from now on.
pub fn debug<P: StateProvider>(provider: P, sink: DebugSink) -> Traced<P> {
    let tap = provider
        .changes()
        .subscribe_changes(move |value| sink.state_change(value));
    Traced {
        inner: provider,
        tap,
    }
}

/// Tap every child `factory` builds.
///
/// Built children come back as [`Child::Provider`] holding a [`Traced`]
/// wrapper; nested maps stay nested, with each of their factories tapped.
pub fn debug_factory(factory: impl Into<Factory>, sink: DebugSink) -> Factory {
    match factory.into() {
        Factory::Build(build) => Factory::leaf(move |seed: Value, ctx: &FactoryContext| {
            Child::provider(debug(build(seed, ctx), sink.clone()))
        }),
        Factory::Nested(map) => Factory::Nested(
            map.iter()
                .map(|(key, factory)| (key, debug_factory(factory.clone(), sink.clone())))
                .collect(),
        ),
    }
}
