#![forbid(unsafe_code)]

//! Reactive engine for statetree.
//!
//! Builds on `statetree-core` with observable cells, controllers, composite
//! aggregation, a debug tap, and environment-driven configuration. All types
//! are single-threaded (`Rc`-based).

pub mod config;
pub mod debug;
pub mod reactive;

pub use config::{RuntimeConfig, TraceMode};
pub use debug::{DebugSink, Traced, debug, debug_factory};
pub use reactive::{
    BatchScope, BatchTarget, ChangeFeed, Child, Composite, CompositeBuilder, CompositeRef,
    Controller, ControllerDef, Factory, FactoryContext, FactoryMap, MutatorFn, MutatorPolicy,
    MutatorTable, StateProvider, Subscription, ValueCell, compose,
};
pub use statetree_core::{
    ConfigurationError, ControllerError, Map, MergePolicy, MergePolicyKind, MutationError, Value,
};
