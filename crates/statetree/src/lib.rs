#![forbid(unsafe_code)]

//! statetree public facade crate.
//!
//! Re-exports the value model from `statetree-core` and, with the default
//! `runtime` feature, the reactive engine from `statetree-runtime`.

pub use statetree_core as core;
#[cfg(feature = "runtime")]
pub use statetree_runtime as runtime;

pub mod prelude {
    pub use statetree_core::{
        ConfigurationError, ControllerError, MergePolicy, MergePolicyKind, MutationError, Value,
    };
    #[cfg(feature = "runtime")]
    pub use statetree_runtime::{
        Composite, Controller, ControllerDef, DebugSink, Factory, FactoryContext, FactoryMap,
        RuntimeConfig, StateProvider, Subscription, ValueCell, compose, debug, debug_factory,
    };
}

#[cfg(all(test, feature = "runtime"))]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_a_tree() {
        let counter = ControllerDef::new(Value::object([("count", 0)])).assign("increment", |s, _| {
            let n = s.field("count").as_i64().unwrap_or(0);
            Value::object([("count", n + 1)])
        });
        let root = Composite::builder(FactoryMap::new().with("counter", counter))
            .config(&RuntimeConfig::default())
            .build()
            .unwrap();
        root.leaf("counter").unwrap().invoke("increment").unwrap();
        assert_eq!(
            root.state().field("counter").field("count"),
            Value::from(1)
        );
    }
}
