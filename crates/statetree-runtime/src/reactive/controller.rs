#![forbid(unsafe_code)]

//! Controllers: a [`ValueCell`] plus a table of named mutators.
//!
//! A mutator is a function of `(current, args)` returning the next value.
//! Its [`MutatorPolicy`] decides how that result lands in the cell:
//!
//! - [`MutatorPolicy::Assign`]: shallow-merged over the current object
//!   (`ValueCell::update`).
//! - [`MutatorPolicy::Overwrite`]: replaces the value (`ValueCell::set`).
//!
//! # Invariants
//!
//! - A failing mutator never touches the cell.
//! - Only the controller writes its cell; consumers get a [`ChangeFeed`].
//! - [`notify_last_change_only`](Controller::notify_last_change_only)
//!   restores the silent flag on every exit path.
//!
//! # Failure Modes
//!
//! - **Unknown mutator name**: [`ControllerError::UnknownMutator`].
//! - **Mutator error**: logged as `controller.mutation_failed` and returned
//!   as [`ControllerError::Mutation`] with the original [`MutationError`].

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use statetree_core::{ControllerError, MutationError, Value};

use super::batch;
use super::cell::{ChangeFeed, Subscription, ValueCell};
use super::factory::{Factory, FactoryContext};
use super::provider::StateProvider;

/// Signature of a fallible mutator.
pub type MutatorFn = dyn Fn(&Value, &[Value]) -> Result<Value, MutationError>;

/// How a mutator's result is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutatorPolicy {
    /// Shallow-merge the result over the current value.
    #[default]
    Assign,
    /// Replace the current value with the result.
    Overwrite,
}

#[derive(Clone)]
struct Mutator {
    policy: MutatorPolicy,
    run: Rc<MutatorFn>,
}

/// Ordered `name -> (policy, fn)` table.
#[derive(Clone, Default)]
pub struct MutatorTable {
    entries: IndexMap<String, Mutator>,
}

impl MutatorTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an infallible [`Assign`](MutatorPolicy::Assign) mutator.
    #[must_use]
    pub fn assign(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Value + 'static,
    ) -> Self {
        self.insert(name, MutatorPolicy::Assign, move |s, a| Ok(f(s, a)));
        self
    }

    /// Add an infallible [`Overwrite`](MutatorPolicy::Overwrite) mutator.
    #[must_use]
    pub fn overwrite(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Value + 'static,
    ) -> Self {
        self.insert(name, MutatorPolicy::Overwrite, move |s, a| Ok(f(s, a)));
        self
    }

    #[must_use]
    pub fn try_assign(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, MutationError> + 'static,
    ) -> Self {
        self.insert(name, MutatorPolicy::Assign, f);
        self
    }

    #[must_use]
    pub fn try_overwrite(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, MutationError> + 'static,
    ) -> Self {
        self.insert(name, MutatorPolicy::Overwrite, f);
        self
    }

    /// Insert or replace a mutator. Replacing keeps the original position.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        policy: MutatorPolicy,
        f: impl Fn(&Value, &[Value]) -> Result<Value, MutationError> + 'static,
    ) {
        self.entries.insert(
            name.into(),
            Mutator {
                policy,
                run: Rc::new(f),
            },
        );
    }

    #[must_use]
    pub fn policy(&self, name: &str) -> Option<MutatorPolicy> {
        self.entries.get(name).map(|m| m.policy)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, name: &str) -> Option<&Mutator> {
        self.entries.get(name)
    }
}

impl fmt::Debug for MutatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, m)| (k, m.policy)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// A leaf holder of state.
///
/// Cloning shares the cell and the mutator table.
#[derive(Clone)]
pub struct Controller {
    cell: ValueCell,
    mutators: Rc<MutatorTable>,
    context: FactoryContext,
}

impl Controller {
    /// A controller with no mutators.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::with_mutators(initial, MutatorTable::new())
    }

    pub fn with_mutators(initial: impl Into<Value>, mutators: impl Into<Rc<MutatorTable>>) -> Self {
        Self {
            cell: ValueCell::new(initial),
            mutators: mutators.into(),
            context: FactoryContext::default(),
        }
    }

    /// Attach the context this controller was built under.
    #[must_use]
    pub fn in_context(mut self, context: FactoryContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn state(&self) -> Value {
        self.cell.get()
    }

    #[must_use]
    pub fn changes(&self) -> ChangeFeed {
        self.cell.feed()
    }

    /// Subscribe with replay. See [`ValueCell::subscribe`].
    pub fn subscribe(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        self.cell.subscribe(observer)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    #[must_use]
    pub fn context(&self) -> &FactoryContext {
        &self.context
    }

    #[must_use]
    pub fn mutators(&self) -> &MutatorTable {
        &self.mutators
    }

    /// Replace the value.
    pub fn set(&self, value: impl Into<Value>) {
        self.cell.set(value);
    }

    /// Shallow-merge `partial` over the value.
    pub fn assign(&self, partial: impl Into<Value>) {
        self.cell.update(partial);
    }

    /// Run the mutator `name` with `args`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<(), ControllerError> {
        let mutator = self
            .mutators
            .get(name)
            .ok_or_else(|| ControllerError::UnknownMutator(name.to_string()))?;
        let current = self.cell.get();
        let next = (mutator.run)(&current, args).map_err(|err| {
            tracing::debug!(
                message = "controller.mutation_failed",
                mutator = name,
                error = %err
            );
            err
        })?;
        match mutator.policy {
            MutatorPolicy::Assign => self.cell.update(next),
            MutatorPolicy::Overwrite => self.cell.set(next),
        }
        Ok(())
    }

    /// [`call`](Self::call) with no arguments.
    pub fn invoke(&self, name: &str) -> Result<(), ControllerError> {
        self.call(name, &[])
    }

    /// Run `f` with notifications suppressed; observers then see at most
    /// one event carrying the final value.
    pub fn notify_last_change_only<R>(&self, f: impl FnOnce() -> R) -> R {
        batch::batch(&self.cell, f)
    }

    /// Fallible [`notify_last_change_only`](Self::notify_last_change_only).
    /// On `Err` nothing is emitted and the error is returned unchanged.
    pub fn try_notify_last_change_only<R, E>(
        &self,
        f: impl FnOnce() -> Result<R, E>,
    ) -> Result<R, E> {
        batch::try_batch(&self.cell, f)
    }

    /// Whether both handles share the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.cell.ptr_eq(&other.cell)
    }
}

impl StateProvider for Controller {
    fn state(&self) -> Value {
        self.cell.get()
    }

    fn changes(&self) -> ChangeFeed {
        self.cell.feed()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.cell.get())
            .field("mutators", &*self.mutators)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ControllerDef
// ---------------------------------------------------------------------------

/// Reusable controller definition: a default initial value plus mutators.
///
/// ```ignore
/// let counter = ControllerDef::new(Value::object([("count", 0)]))
///     .assign("increment", |s, _| {
///         let n = s.field("count").as_i64().unwrap_or(0);
///         Value::object([("count", n + 1)])
///     });
/// let a = counter.build();
/// ```
#[derive(Clone, Default)]
pub struct ControllerDef {
    initial: Value,
    mutators: Rc<MutatorTable>,
}

impl ControllerDef {
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            initial: initial.into(),
            mutators: Rc::new(MutatorTable::new()),
        }
    }

    #[must_use]
    pub fn assign(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Value + 'static,
    ) -> Self {
        Rc::make_mut(&mut self.mutators).insert(name, MutatorPolicy::Assign, move |s, a| {
            Ok(f(s, a))
        });
        self
    }

    #[must_use]
    pub fn overwrite(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Value + 'static,
    ) -> Self {
        Rc::make_mut(&mut self.mutators).insert(name, MutatorPolicy::Overwrite, move |s, a| {
            Ok(f(s, a))
        });
        self
    }

    #[must_use]
    pub fn try_assign(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, MutationError> + 'static,
    ) -> Self {
        Rc::make_mut(&mut self.mutators).insert(name, MutatorPolicy::Assign, f);
        self
    }

    #[must_use]
    pub fn try_overwrite(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, MutationError> + 'static,
    ) -> Self {
        Rc::make_mut(&mut self.mutators).insert(name, MutatorPolicy::Overwrite, f);
        self
    }

    #[must_use]
    pub fn initial(&self) -> &Value {
        &self.initial
    }

    /// A controller seeded with the default initial value.
    #[must_use]
    pub fn build(&self) -> Controller {
        Controller::with_mutators(self.initial.clone(), Rc::clone(&self.mutators))
    }

    /// A controller seeded with `initial`, or the default when `initial` is
    /// `Undefined`.
    #[must_use]
    pub fn build_with(&self, initial: impl Into<Value>) -> Controller {
        let initial = initial.into();
        let seed = if initial.is_undefined() {
            self.initial.clone()
        } else {
            initial
        };
        Controller::with_mutators(seed, Rc::clone(&self.mutators))
    }

    /// [`build_with`](Self::build_with) under a factory context.
    #[must_use]
    pub fn build_in(&self, initial: Value, context: &FactoryContext) -> Controller {
        self.build_with(initial).in_context(context.clone())
    }

    /// A composite factory producing controllers from this definition.
    #[must_use]
    pub fn factory(&self) -> Factory {
        let def = self.clone();
        Factory::leaf(move |seed, ctx| def.build_in(seed, ctx))
    }
}

impl fmt::Debug for ControllerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDef")
            .field("initial", &self.initial)
            .field("mutators", &*self.mutators)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn counter() -> ControllerDef {
        ControllerDef::new(Value::object([("count", 0)]))
            .assign("increment", |s, _| {
                let n = s.field("count").as_i64().unwrap_or(0);
                Value::object([("count", n + 1)])
            })
            .assign("add", |s, args| {
                let n = s.field("count").as_i64().unwrap_or(0);
                let by = args.first().and_then(Value::as_i64).unwrap_or(0);
                Value::object([("count", n + by)])
            })
            .try_assign("withdraw", |s, _| {
                let n = s.field("count").as_i64().unwrap_or(0);
                if n == 0 {
                    Err(MutationError::new("nothing to withdraw"))
                } else {
                    Ok(Value::object([("count", n - 1)]))
                }
            })
            .overwrite("reset", |_, _| Value::object([("count", 0)]))
    }

    fn record(ctl: &Controller) -> (Rc<RefCell<Vec<Value>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = ctl.subscribe(move |v| sink.borrow_mut().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn call_runs_named_mutator() {
        let ctl = counter().build();
        ctl.invoke("increment").unwrap();
        ctl.call("add", &[Value::from(4)]).unwrap();
        assert_eq!(ctl.state().field("count"), Value::from(5));
        assert_eq!(ctl.version(), 2);
    }

    #[test]
    fn assign_policy_keeps_other_fields() {
        let ctl = counter().build_with(Value::object([
            ("count", Value::from(1)),
            ("label", Value::from("x")),
        ]));
        ctl.invoke("increment").unwrap();
        assert_eq!(ctl.state().field("label"), Value::from("x"));
    }

    #[test]
    fn overwrite_policy_replaces_value() {
        let ctl = counter().build_with(Value::object([
            ("count", Value::from(3)),
            ("label", Value::from("x")),
        ]));
        ctl.invoke("reset").unwrap();
        assert_eq!(ctl.state(), Value::object([("count", 0)]));
    }

    #[test]
    fn unknown_mutator_is_reported() {
        let ctl = counter().build();
        let err = ctl.invoke("explode").unwrap_err();
        assert_eq!(err, ControllerError::UnknownMutator("explode".into()));
    }

    #[test]
    fn failing_mutator_leaves_state_untouched() {
        let ctl = counter().build();
        let (seen, _sub) = record(&ctl);
        let before = ctl.state();
        let err = ctl.invoke("withdraw").unwrap_err();
        assert_eq!(
            err,
            ControllerError::Mutation(MutationError::new("nothing to withdraw"))
        );
        assert!(ctl.state().is_same(&before));
        assert_eq!(ctl.version(), 0);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn build_with_undefined_uses_default() {
        let ctl = counter().build_with(Value::Undefined);
        assert_eq!(ctl.state(), Value::object([("count", 0)]));
    }

    #[test]
    fn notify_last_change_only_emits_final_state() {
        let ctl = counter().build();
        let (seen, _sub) = record(&ctl);
        ctl.notify_last_change_only(|| {
            for _ in 0..3 {
                ctl.invoke("increment").unwrap();
            }
        });
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], Value::object([("count", 3)]));
    }

    #[test]
    fn try_notify_last_change_only_propagates_error() {
        let ctl = counter().build();
        let (seen, _sub) = record(&ctl);
        let out = ctl.try_notify_last_change_only(|| {
            ctl.invoke("increment")?;
            ctl.invoke("missing")
        });
        assert_eq!(out, Err(ControllerError::UnknownMutator("missing".into())));
        assert_eq!(ctl.state(), Value::object([("count", 1)]));
        assert_eq!(seen.borrow().len(), 1);

        ctl.invoke("increment").unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn clones_share_cell() {
        let a = counter().build();
        let b = a.clone();
        b.invoke("increment").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.state().field("count"), Value::from(1));
    }

    #[test]
    fn definitions_build_independent_controllers() {
        let def = counter();
        let a = def.build();
        let b = def.build();
        a.invoke("increment").unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(b.state().field("count"), Value::from(0));
    }

    #[test]
    fn table_reports_names_in_order() {
        let def = counter();
        let ctl = def.build();
        let names: Vec<_> = ctl.mutators().names().collect();
        assert_eq!(names, ["increment", "add", "withdraw", "reset"]);
        assert_eq!(ctl.mutators().policy("reset"), Some(MutatorPolicy::Overwrite));
    }
}
