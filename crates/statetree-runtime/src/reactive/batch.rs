#![forbid(unsafe_code)]

//! Batched ("last change only") notification scopes.
//!
//! A [`BatchScope`] silences a target for its lifetime. Writes made while a
//! target is silenced land immediately; only the notification is deferred.
//! When the outermost scope is committed the target publishes its net final
//! state once.
//!
//! # Invariants
//!
//! 1. Scopes nest. Only the outermost commit flushes.
//! 2. The silent flag is restored on every exit path: commit, drop without
//!    commit, and unwinding.
//! 3. A scope dropped without [`commit`](BatchScope::commit) publishes
//!    nothing. State keeps whatever partial writes happened.
//!
//! # Usage
//!
//! ```ignore
//! let cell = ValueCell::new(0);
//! let scope = BatchScope::enter(&cell);
//! cell.set(1);
//! cell.set(2);
//! scope.commit(); // subscribers see 2, never 1
//! ```

use statetree_core::Value;

/// Something that can be silenced for the duration of a batch.
pub trait BatchTarget {
    /// Enter one level of silence.
    fn silence(&self);

    /// Leave one level of silence. `commit` is false on the failure path.
    fn release(&self, commit: bool);
}

/// RAII guard for one level of silence on a [`BatchTarget`].
#[must_use = "dropping a BatchScope immediately abandons the batch"]
pub struct BatchScope<'a> {
    target: &'a dyn BatchTarget,
    open: bool,
}

impl<'a> BatchScope<'a> {
    /// Silence `target` until the scope is committed or dropped.
    pub fn enter(target: &'a dyn BatchTarget) -> Self {
        target.silence();
        Self { target, open: true }
    }

    /// Close the scope and flush if it is the outermost one.
    pub fn commit(mut self) {
        self.open = false;
        self.target.release(true);
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.target.release(false);
        }
    }
}

impl std::fmt::Debug for BatchScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("open", &self.open)
            .finish()
    }
}

/// Run `f` inside a batch on `target`, flushing once when it returns.
pub fn batch<R>(target: &dyn BatchTarget, f: impl FnOnce() -> R) -> R {
    let scope = BatchScope::enter(target);
    let out = f();
    scope.commit();
    out
}

/// Fallible [`batch`]: on `Err` the scope is abandoned and nothing is
/// published.
pub fn try_batch<R, E>(target: &dyn BatchTarget, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
    let scope = BatchScope::enter(target);
    let out = f();
    if out.is_ok() {
        scope.commit();
    } else {
        drop(scope);
    }
    out
}

/// Reentrant silence counter plus the value captured at outermost entry.
#[derive(Debug, Default)]
pub(crate) struct Silence {
    depth: usize,
    entry: Option<Value>,
}

impl Silence {
    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self, current: &Value) {
        if self.depth == 0 {
            self.entry = Some(current.clone());
        }
        self.depth += 1;
    }

    /// Leave one level. Returns the entry value when the outermost level
    /// closes.
    pub(crate) fn exit(&mut self) -> Option<Value> {
        debug_assert!(self.depth > 0, "unbalanced silence exit");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.entry.take()
        } else {
            None
        }
    }
}
