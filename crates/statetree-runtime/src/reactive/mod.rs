#![forbid(unsafe_code)]

//! Reactive state holders for statetree.
//!
//! - [`ValueCell`]: a shared, version-tracked [`Value`](statetree_core::Value)
//!   with distinct-change notification and replay-on-subscribe.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Controller`]: a cell plus a table of named mutators.
//! - [`Composite`]: a tree of controllers and sub-composites aggregated into
//!   one object-shaped state through a [`MergePolicy`](statetree_core::MergePolicy).
//! - [`BatchScope`]: defers notification until the outermost scope closes.
//!
//! # Architecture
//!
//! Every holder wraps `Rc<RefCell<..>>` storage and is single-threaded.
//! Observers are stored as `Weak` function pointers and pruned lazily; a
//! composite holds the strong ends of its child subscriptions, so dropping
//! the composite detaches it from its children.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per distinct write.
//! 2. Observers are notified in registration order.
//! 3. Writing a value that [`is_same`](statetree_core::Value::is_same) as the
//!    current one is a no-op.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. A composite's state never lags its children once no batch is open.

pub mod batch;
pub mod cell;
pub mod composite;
pub mod controller;
pub mod factory;
pub mod provider;

pub use batch::{BatchScope, BatchTarget};
pub use cell::{ChangeFeed, Subscription, ValueCell};
pub use composite::{Child, Composite, CompositeBuilder, CompositeRef};
pub use controller::{Controller, ControllerDef, MutatorFn, MutatorPolicy, MutatorTable};
pub use factory::{Factory, FactoryContext, FactoryMap, compose};
pub use provider::StateProvider;
