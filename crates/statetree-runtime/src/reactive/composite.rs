#![forbid(unsafe_code)]

//! Composites: a tree of children aggregated into one object-shaped state.
//!
//! # Design
//!
//! A [`Composite`] owns an ordered set of children (controllers, nested
//! composites, or any [`StateProvider`]) and an aggregate [`ValueCell`]. It
//! subscribes to every child's change feed; when child `k` emits `v` and
//! `v` is not already the `k` slice of the aggregate, the aggregate is
//! rebuilt as `merge(state, {k: v})` and written through the cell, whose own
//! distinct filter applies.
//!
//! The aggregate is written only by this pipeline. There is no public
//! setter.
//!
//! # Invariants
//!
//! 1. A child event identical to its current slice never recomputes, so the
//!    replay events fired while linking are absorbed.
//! 2. An initial value supplied at construction becomes the aggregate as-is
//!    (same allocation). Without one, the aggregate is sampled from the
//!    freshly built children.
//! 3. While a batch is open the pipeline ignores child events. Closing the
//!    outermost batch reconciles every stale slice and writes once.
//! 4. Reserved keys (`state`, `changes`) are rejected at any depth before
//!    any child is built.
//!
//! # Failure Modes
//!
//! - **Batch closure fails or panics**: the aggregate is reconciled without
//!   notifying, so it never lags the children. The next child change is
//!   delivered normally.
//! - **Factory reads `ctx.parent()` during construction**: returns `None`;
//!   the root is reachable only once construction has finished.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use statetree_core::{ConfigurationError, MergePolicy, Value};

use super::batch::{self, BatchTarget, Silence};
use super::cell::{ChangeFeed, Subscription, ValueCell};
use super::controller::Controller;
use super::factory::{FactoryContext, FactoryMap};
use super::provider::StateProvider;
use crate::config::RuntimeConfig;

// ---------------------------------------------------------------------------
// Child
// ---------------------------------------------------------------------------

/// One built child of a composite.
#[derive(Clone)]
pub enum Child {
    Leaf(Controller),
    Composite(Composite),
    /// Any other state holder, e.g. a traced controller.
    Provider(Rc<dyn StateProvider>),
}

impl Child {
    /// Wrap an arbitrary provider.
    pub fn provider(provider: impl StateProvider + 'static) -> Self {
        Self::Provider(Rc::new(provider))
    }

    #[must_use]
    pub fn state(&self) -> Value {
        match self {
            Self::Leaf(c) => c.state(),
            Self::Composite(c) => c.state(),
            Self::Provider(p) => p.state(),
        }
    }

    #[must_use]
    pub fn changes(&self) -> ChangeFeed {
        match self {
            Self::Leaf(c) => c.changes(),
            Self::Composite(c) => c.changes(),
            Self::Provider(p) => p.changes(),
        }
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&Controller> {
        match self {
            Self::Leaf(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Self::Composite(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Controller> for Child {
    fn from(c: Controller) -> Self {
        Self::Leaf(c)
    }
}

impl From<Composite> for Child {
    fn from(c: Composite) -> Self {
        Self::Composite(c)
    }
}

impl StateProvider for Child {
    fn state(&self) -> Value {
        Child::state(self)
    }

    fn changes(&self) -> ChangeFeed {
        Child::changes(self)
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(c) => f.debug_tuple("Leaf").field(c).finish(),
            Self::Composite(c) => f.debug_tuple("Composite").field(c).finish(),
            Self::Provider(p) => f.debug_tuple("Provider").field(&p.state()).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

struct CompositeInner {
    cell: ValueCell,
    children: IndexMap<String, Child>,
    merge: MergePolicy,
    silence: RefCell<Silence>,
    links: RefCell<Vec<Subscription>>,
    context: FactoryContext,
}

/// Aggregating holder of state.
///
/// Cloning creates another handle to the same node.
#[derive(Clone)]
pub struct Composite {
    inner: Rc<CompositeInner>,
}

impl Composite {
    /// Build a composite with the default merge policy and no options.
    pub fn new(
        factories: impl Into<FactoryMap>,
        initial: Option<Value>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = Self::builder(factories);
        if let Some(initial) = initial {
            builder = builder.initial(initial);
        }
        builder.build()
    }

    pub fn builder(factories: impl Into<FactoryMap>) -> CompositeBuilder {
        CompositeBuilder {
            factories: factories.into(),
            initial: Value::Undefined,
            merge: MergePolicy::default(),
            options: Value::Undefined,
        }
    }

    /// Build the node for an already validated map.
    pub(crate) fn assemble(factories: &FactoryMap, initial: Value, ctx: &FactoryContext) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<CompositeInner>| {
            let context = ctx.rooted_at(CompositeRef {
                inner: weak.clone(),
            });
            let children: IndexMap<String, Child> = factories
                .iter()
                .map(|(key, factory)| (key.to_string(), factory.build(initial.field(key), &context)))
                .collect();
            let seed = if initial.is_undefined() {
                Value::object(children.iter().map(|(key, child)| (key.clone(), child.state())))
            } else {
                initial
            };
            CompositeInner {
                cell: ValueCell::new(seed),
                children,
                merge: context.merge_policy().clone(),
                silence: RefCell::new(Silence::default()),
                links: RefCell::new(Vec::new()),
                context,
            }
        });
        let composite = Self { inner };
        composite.link_children();
        composite
    }

    /// Subscribe to every child. The replay of each child runs through the
    /// pipeline, reconciling slices the children had to default.
    fn link_children(&self) {
        let mut links = Vec::with_capacity(self.inner.children.len());
        for (key, child) in &self.inner.children {
            let weak = Rc::downgrade(&self.inner);
            let key = key.clone();
            links.push(child.changes().subscribe(move |value| {
                if let Some(inner) = weak.upgrade() {
                    Composite { inner }.on_child_change(&key, value);
                }
            }));
        }
        *self.inner.links.borrow_mut() = links;
    }

    fn on_child_change(&self, key: &str, value: &Value) {
        if self.inner.silence.borrow().is_active() {
            return;
        }
        let current = self.inner.cell.get();
        if value.is_same(&current.field(key)) {
            return;
        }
        tracing::trace!(message = "composite.recompute", key);
        let next = self.inner.merge.apply_entry(&current, key, value.clone());
        self.inner.cell.set(next);
    }

    /// Fold every stale child slice into the aggregate.
    fn reconcile(&self) -> Value {
        let current = self.inner.cell.get();
        let mut changed = 0usize;
        let next = self
            .inner
            .children
            .iter()
            .fold(current.clone(), |acc, (key, child)| {
                let value = child.state();
                if value.is_same(&acc.field(key)) {
                    acc
                } else {
                    changed += 1;
                    self.inner.merge.apply_entry(&acc, key, value)
                }
            });
        tracing::debug!(message = "composite.reconcile", changed);
        next
    }

    #[must_use]
    pub fn state(&self) -> Value {
        self.inner.cell.get()
    }

    #[must_use]
    pub fn changes(&self) -> ChangeFeed {
        self.inner.cell.feed()
    }

    /// Subscribe with replay. See [`ValueCell::subscribe`].
    pub fn subscribe(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.cell.subscribe(observer)
    }

    /// Number of distinct aggregate writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.cell.version()
    }

    #[must_use]
    pub fn child(&self, key: &str) -> Option<&Child> {
        self.inner.children.get(key)
    }

    /// The child at `key` if it is a controller.
    #[must_use]
    pub fn leaf(&self, key: &str) -> Option<&Controller> {
        self.child(key).and_then(Child::as_leaf)
    }

    /// The child at `key` if it is a sub-composite.
    #[must_use]
    pub fn node(&self, key: &str) -> Option<&Composite> {
        self.child(key).and_then(Child::as_composite)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Child)> {
        self.inner.children.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.children.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.children.is_empty()
    }

    #[must_use]
    pub fn merge_policy(&self) -> &MergePolicy {
        &self.inner.merge
    }

    /// The context this node's children were built with.
    #[must_use]
    pub fn context(&self) -> &FactoryContext {
        &self.inner.context
    }

    /// Run `f` with aggregation suppressed; observers then see at most one
    /// event carrying the reconciled aggregate.
    pub fn notify_last_change_only<R>(&self, f: impl FnOnce() -> R) -> R {
        batch::batch(self, f)
    }

    /// Fallible [`notify_last_change_only`](Self::notify_last_change_only).
    /// On `Err` the aggregate is reconciled silently and the error returned.
    pub fn try_notify_last_change_only<R, E>(
        &self,
        f: impl FnOnce() -> Result<R, E>,
    ) -> Result<R, E> {
        batch::try_batch(self, f)
    }

    #[must_use]
    pub fn is_silenced(&self) -> bool {
        self.inner.silence.borrow().is_active()
    }

    #[must_use]
    pub fn downgrade(&self) -> CompositeRef {
        CompositeRef {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl BatchTarget for Composite {
    fn silence(&self) {
        let current = self.inner.cell.get();
        self.inner.silence.borrow_mut().enter(&current);
    }

    fn release(&self, commit: bool) {
        if self.inner.silence.borrow_mut().exit().is_none() {
            return;
        }
        let next = self.reconcile();
        if commit {
            tracing::debug!(message = "batch.flush", source = "composite");
            self.inner.cell.set(next);
        } else {
            tracing::debug!(message = "batch.abandoned", source = "composite");
            self.inner.cell.write_quietly(next);
        }
    }
}

impl StateProvider for Composite {
    fn state(&self) -> Value {
        self.inner.cell.get()
    }

    fn changes(&self) -> ChangeFeed {
        self.inner.cell.feed()
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("state", &self.inner.cell.get())
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("merge", &self.inner.merge.name())
            .field("silenced", &self.inner.silence.borrow().depth())
            .finish()
    }
}

/// Non-owning handle to a [`Composite`].
#[derive(Clone)]
pub struct CompositeRef {
    inner: Weak<CompositeInner>,
}

impl CompositeRef {
    #[must_use]
    pub fn upgrade(&self) -> Option<Composite> {
        self.inner.upgrade().map(|inner| Composite { inner })
    }

    /// Whether this handle refers to `composite`.
    #[must_use]
    pub fn points_to(&self, composite: &Composite) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&composite.inner))
    }
}

impl fmt::Debug for CompositeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRef")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and builds a root [`Composite`].
#[derive(Debug, Clone)]
pub struct CompositeBuilder {
    factories: FactoryMap,
    initial: Value,
    merge: MergePolicy,
    options: Value,
}

impl CompositeBuilder {
    /// Seed the aggregate with `initial` instead of sampling the children.
    #[must_use]
    pub fn initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = initial.into();
        self
    }

    /// Merge policy for this node and every nested sub-composite.
    #[must_use]
    pub fn merge_policy(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    /// Options forwarded to every factory through [`FactoryContext`].
    #[must_use]
    pub fn options(mut self, options: impl Into<Value>) -> Self {
        self.options = options.into();
        self
    }

    /// Apply the runtime configuration.
    #[must_use]
    pub fn config(self, config: &RuntimeConfig) -> Self {
        self.merge_policy(config.merge_policy.policy())
    }

    pub fn build(self) -> Result<Composite, ConfigurationError> {
        if let Err(err) = self.factories.validate() {
            if let ConfigurationError::ReservedKey { key } = &err {
                tracing::debug!(message = "composite.reserved_key", key = %key);
            }
            return Err(err);
        }
        let ctx = FactoryContext::new(self.options).with_merge_policy(self.merge);
        let composite = Composite::assemble(&self.factories, self.initial, &ctx);
        tracing::debug!(
            message = "composite.build",
            children = composite.len(),
            merge = composite.merge_policy().name()
        );
        Ok(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ControllerDef, Factory, compose};
    use statetree_core::MergePolicyKind;
    use std::cell::Cell;

    fn counter() -> ControllerDef {
        ControllerDef::new(Value::object([("count", 0)])).assign("increment", |s, _| {
            let n = s.field("count").as_i64().unwrap_or(0);
            Value::object([("count", n + 1)])
        })
    }

    fn pair() -> FactoryMap {
        FactoryMap::new().with("a", counter()).with("b", counter())
    }

    fn count_events(composite: &Composite) -> (Rc<Cell<usize>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = composite
            .changes()
            .subscribe_changes(move |_| h.set(h.get() + 1));
        (hits, sub)
    }

    #[test]
    fn samples_children_when_initial_omitted() {
        let composite = Composite::new(pair(), None).unwrap();
        assert_eq!(
            composite.state(),
            Value::object([
                ("a", Value::object([("count", 0)])),
                ("b", Value::object([("count", 0)])),
            ])
        );
        assert_eq!(composite.version(), 0);
    }

    #[test]
    fn child_change_recomputes_aggregate() {
        let composite = Composite::new(pair(), None).unwrap();
        let (hits, _sub) = count_events(&composite);
        let a = composite.leaf("a").unwrap();
        a.invoke("increment").unwrap();
        assert_eq!(hits.get(), 1);
        assert!(composite.state().field("a").is_same(&a.state()));
        assert_eq!(composite.state().field("b"), Value::object([("count", 0)]));
    }

    #[test]
    fn defaulted_slices_are_reconciled_at_construction() {
        let composite =
            Composite::new(pair(), Some(Value::object([("a", Value::object([("count", 3)]))])))
                .unwrap();
        assert_eq!(composite.state().field("a"), Value::object([("count", 3)]));
        assert_eq!(composite.state().field("b"), Value::object([("count", 0)]));
    }

    #[test]
    fn nested_composite_propagates_to_root() {
        let map = FactoryMap::new()
            .with("top", counter())
            .with("group", FactoryMap::new().with("inner", counter()));
        let root = Composite::new(map, None).unwrap();
        let (hits, _sub) = count_events(&root);

        let inner = root.node("group").and_then(|g| g.leaf("inner")).unwrap();
        inner.invoke("increment").unwrap();

        assert_eq!(hits.get(), 1);
        assert_eq!(
            root.state().field("group").field("inner").field("count"),
            Value::from(1)
        );
    }

    #[test]
    fn batch_reconciles_once() {
        let composite = Composite::new(pair(), None).unwrap();
        let (hits, _sub) = count_events(&composite);
        let a = composite.leaf("a").unwrap().clone();
        let b = composite.leaf("b").unwrap().clone();
        composite.notify_last_change_only(|| {
            a.invoke("increment").unwrap();
            b.invoke("increment").unwrap();
            assert!(composite.is_silenced());
        });
        assert_eq!(hits.get(), 1);
        assert_eq!(composite.state().field("a").field("count"), Value::from(1));
        assert_eq!(composite.state().field("b").field("count"), Value::from(1));
    }

    #[test]
    fn empty_batch_is_silent() {
        let composite = Composite::new(pair(), None).unwrap();
        let (hits, _sub) = count_events(&composite);
        composite.notify_last_change_only(|| {});
        assert_eq!(hits.get(), 0);
        assert_eq!(composite.version(), 0);
    }

    #[test]
    fn failed_batch_reconciles_quietly() {
        let composite = Composite::new(pair(), None).unwrap();
        let (hits, _sub) = count_events(&composite);
        let a = composite.leaf("a").unwrap().clone();
        let out: Result<(), &str> = composite.try_notify_last_change_only(|| {
            a.invoke("increment").unwrap();
            Err("abort")
        });
        assert_eq!(out, Err("abort"));
        assert!(!composite.is_silenced());
        assert_eq!(hits.get(), 0);
        assert!(composite.state().field("a").is_same(&a.state()));

        a.invoke("increment").unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn failed_batch_inside_observer_keeps_later_observers_informed() {
        let composite = Composite::new(pair(), None).unwrap();
        let a = composite.leaf("a").unwrap().clone();
        let b = composite.leaf("b").unwrap().clone();
        let weak = composite.downgrade();
        let fired = Rc::new(Cell::new(false));
        let once = Rc::clone(&fired);
        let _first = composite.changes().subscribe_changes(move |_| {
            if once.replace(true) {
                return;
            }
            if let Some(root) = weak.upgrade() {
                let _: Result<(), ()> = root.try_notify_last_change_only(|| {
                    b.invoke("increment").unwrap();
                    Err(())
                });
            }
        });
        let (hits, _second) = count_events(&composite);

        a.invoke("increment").unwrap();

        assert!(fired.get());
        assert_eq!(hits.get(), 1);
        assert_eq!(composite.state().field("a").field("count"), Value::from(1));
        assert_eq!(composite.state().field("b").field("count"), Value::from(1));
    }

    #[test]
    fn panicking_batch_restores_flag() {
        let composite = Composite::new(pair(), None).unwrap();
        let a = composite.leaf("a").unwrap().clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            composite.notify_last_change_only::<()>(|| {
                a.invoke("increment").unwrap();
                panic!("mid-batch");
            });
        }));
        assert!(result.is_err());
        assert!(!composite.is_silenced());
        assert_eq!(composite.state().field("a").field("count"), Value::from(1));
    }

    #[test]
    fn deep_merge_policy_removes_undefined_slices() {
        let map = FactoryMap::new()
            .with("a", Factory::leaf(|seed: Value, _: &FactoryContext| Controller::new(seed)))
            .with("b", Factory::leaf(|seed: Value, _: &FactoryContext| Controller::new(seed)));
        let composite = Composite::builder(map)
            .merge_policy(MergePolicyKind::DeepMergeWithDelete.policy())
            .initial(Value::object([("a", 1), ("b", 2)]))
            .build()
            .unwrap();
        composite.leaf("b").unwrap().set(Value::Undefined);
        assert_eq!(composite.state(), Value::object([("a", 1)]));
        assert!(!composite.state().has_field("b"));
    }

    #[test]
    fn config_selects_merge_policy() {
        let config = RuntimeConfig::default().with_merge_policy(MergePolicyKind::DeepMergeWithDelete);
        let composite = Composite::builder(pair()).config(&config).build().unwrap();
        assert_eq!(composite.merge_policy().name(), "deep-merge-with-delete");
        let group = FactoryMap::new().with("g", pair());
        let root = Composite::builder(group).config(&config).build().unwrap();
        assert_eq!(
            root.node("g").unwrap().merge_policy().name(),
            "deep-merge-with-delete"
        );
    }

    #[test]
    fn reserved_key_fails_before_building() {
        let built = Rc::new(Cell::new(0));
        let b = Rc::clone(&built);
        let map = FactoryMap::new()
            .with(
                "ok",
                Factory::leaf(move |seed: Value, _: &FactoryContext| {
                    b.set(b.get() + 1);
                    Controller::new(seed)
                }),
            )
            .with("changes", counter());
        let err = Composite::new(map, None).unwrap_err();
        assert_eq!(err, ConfigurationError::ReservedKey { key: "changes".into() });
        assert_eq!(built.get(), 0);
    }

    #[test]
    fn compose_builds_independent_sub_composites() {
        let pair_factory = compose(pair(), Value::Undefined).unwrap();
        let map = FactoryMap::new()
            .with("left", pair_factory.clone())
            .with("right", pair_factory);
        let root = Composite::new(map, None).unwrap();
        let left = root.node("left").unwrap();
        let right = root.node("right").unwrap();
        assert!(!left.ptr_eq(right));
        left.leaf("a").unwrap().invoke("increment").unwrap();
        assert_eq!(
            root.state().field("left").field("a").field("count"),
            Value::from(1)
        );
        assert_eq!(
            root.state().field("right").field("a").field("count"),
            Value::from(0)
        );
    }

    #[test]
    fn compose_uses_default_initial_for_missing_slice() {
        let seeded = Value::object([
            ("a", Value::object([("count", 7)])),
            ("b", Value::object([("count", 8)])),
        ]);
        let factory = compose(pair(), seeded.clone()).unwrap();
        let root = Composite::new(FactoryMap::new().with("p", factory), None).unwrap();
        assert!(root.node("p").unwrap().state().is_same(&seeded));
    }

    #[test]
    fn dropping_root_releases_children_links() {
        let composite = Composite::new(pair(), None).unwrap();
        let a = composite.leaf("a").unwrap().clone();
        drop(composite);
        a.invoke("increment").unwrap();
        assert_eq!(a.changes().current().field("count"), Value::from(1));
    }

    #[test]
    fn downgrade_points_back() {
        let composite = Composite::new(pair(), None).unwrap();
        let weak = composite.downgrade();
        assert!(weak.points_to(&composite));
        assert!(weak.upgrade().is_some_and(|c| c.ptr_eq(&composite)));
        drop(composite);
        assert!(weak.upgrade().is_none());
    }
}
