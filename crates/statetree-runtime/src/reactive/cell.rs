#![forbid(unsafe_code)]

//! Single-owner state cell with distinct-change notification.
//!
//! # Design
//!
//! [`ValueCell`] keeps its value, a version counter, and its observer list
//! in shared `Rc<RefCell<..>>` storage. Observers are held as `Weak`
//! function pointers; the strong end lives in the [`Subscription`] returned
//! to the caller, so dropping (or explicitly unsubscribing) the guard is all
//! it takes to stop delivery. Dead entries are pruned lazily.
//!
//! # Invariants
//!
//! 1. A notification fires iff the written value is not
//!    [`is_same`](Value::is_same) as the previous one.
//! 2. `version` increments exactly once per distinct write, silenced or not.
//! 3. [`subscribe`](ValueCell::subscribe) replays the current value to the
//!    new observer before returning.
//! 4. Dispatch walks a snapshot of the observer list. Observers added during
//!    a dispatch wait for the next one; observers removed during a dispatch
//!    are skipped.
//! 5. A dispatch superseded by a reentrant newer dispatch stops delivering
//!    its stale value; the newer dispatch already reached every observer.
//!    Quiet writes (silenced or abandoned batches) bump `version` but never
//!    cut a running dispatch short.
//!
//! # Failure Modes
//!
//! - **Observer panics**: the panic propagates to the writer. The value has
//!   already been stored; no borrow is held while observers run.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use statetree_core::Value;

use super::batch::{self, BatchTarget, Silence};

type Callback = dyn Fn(&Value);

struct CellInner {
    value: Value,
    version: u64,
    dispatch: u64,
    observers: Vec<Weak<Callback>>,
    silence: Silence,
}

/// A mutable, observable [`Value`].
///
/// Cloning a `ValueCell` creates a new handle to the **same** cell.
#[derive(Clone)]
pub struct ValueCell {
    inner: Rc<RefCell<CellInner>>,
}

impl ValueCell {
    /// Create a cell holding `initial`. Construction never notifies.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CellInner {
                value: initial.into(),
                version: 0,
                dispatch: 0,
                observers: Vec::new(),
                silence: Silence::default(),
            })),
        }
    }

    /// The current value.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this same cell (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Number of distinct writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Write `value`, notifying observers if it is distinct.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let notify = {
            let mut inner = self.inner.borrow_mut();
            if inner.value.is_same(&value) {
                return;
            }
            inner.value = value;
            inner.version += 1;
            !inner.silence.is_active()
        };
        if notify {
            self.notify();
        }
    }

    /// Shallow-merge `partial` over an object value, or replace a primitive.
    pub fn update(&self, partial: impl Into<Value>) {
        let next = self.get().shallow_merge(&partial.into());
        self.set(next);
    }

    /// Register `observer` and replay the current value to it.
    pub fn subscribe(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        let callback: Rc<Callback> = Rc::new(observer);
        self.register(&callback);
        let current = self.get();
        callback(&current);
        Subscription {
            callback: Some(callback),
        }
    }

    /// Register `observer` without the replay; it only sees later changes.
    pub fn subscribe_changes(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        let callback: Rc<Callback> = Rc::new(observer);
        self.register(&callback);
        Subscription {
            callback: Some(callback),
        }
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner
            .borrow()
            .observers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether a batch is currently suppressing notifications.
    #[must_use]
    pub fn is_silenced(&self) -> bool {
        self.inner.borrow().silence.is_active()
    }

    /// Read-only view of this cell for consumers that must not write.
    #[must_use]
    pub fn feed(&self) -> ChangeFeed {
        ChangeFeed { cell: self.clone() }
    }

    /// Run `f` with notifications suppressed, then publish the net change
    /// once.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        batch::batch(self, f)
    }

    /// Fallible [`batch`](Self::batch). On `Err` nothing is published; the
    /// writes made before the error stay in place.
    pub fn try_batch<R, E>(&self, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        batch::try_batch(self, f)
    }

    /// Whether both handles point at the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Store `value` without notifying anyone.
    pub(crate) fn write_quietly(&self, value: Value) {
        let mut inner = self.inner.borrow_mut();
        if !inner.value.is_same(&value) {
            inner.value = value;
            inner.version += 1;
        }
    }

    fn register(&self, callback: &Rc<Callback>) {
        let mut inner = self.inner.borrow_mut();
        inner.observers.retain(|w| w.strong_count() > 0);
        inner.observers.push(Rc::downgrade(callback));
    }

    fn notify(&self) {
        let (value, version, dispatch, observers) = {
            let mut inner = self.inner.borrow_mut();
            inner.observers.retain(|w| w.strong_count() > 0);
            inner.dispatch += 1;
            (
                inner.value.clone(),
                inner.version,
                inner.dispatch,
                inner.observers.clone(),
            )
        };
        tracing::trace!(
            message = "cell.notify",
            version,
            observers = observers.len()
        );
        for weak in observers {
            if self.inner.borrow().dispatch != dispatch {
                break;
            }
            if let Some(callback) = weak.upgrade() {
                callback(&value);
            }
        }
    }
}

impl BatchTarget for ValueCell {
    fn silence(&self) {
        let mut inner = self.inner.borrow_mut();
        let current = inner.value.clone();
        inner.silence.enter(&current);
    }

    fn release(&self, commit: bool) {
        let (outermost, flush) = {
            let mut inner = self.inner.borrow_mut();
            match inner.silence.exit() {
                Some(entry) => (true, commit && !entry.is_same(&inner.value)),
                None => (false, false),
            }
        };
        if !outermost {
            return;
        }
        if flush {
            tracing::debug!(message = "batch.flush", source = "cell");
            self.notify();
        } else if !commit {
            tracing::debug!(message = "batch.abandoned", source = "cell");
        }
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ValueCell")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("silenced", &inner.silence.depth())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for one observer registration.
///
/// Dropping the guard, or calling [`unsubscribe`](Self::unsubscribe), stops
/// delivery. Both are idempotent and never panic.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    callback: Option<Rc<Callback>>,
}

impl Subscription {
    /// Stop delivery. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        self.callback = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChangeFeed
// ---------------------------------------------------------------------------

/// Read-only handle onto a cell's value and change stream.
#[derive(Clone)]
pub struct ChangeFeed {
    cell: ValueCell,
}

impl ChangeFeed {
    #[must_use]
    pub fn current(&self) -> Value {
        self.cell.get()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// See [`ValueCell::subscribe`].
    pub fn subscribe(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        self.cell.subscribe(observer)
    }

    /// See [`ValueCell::subscribe_changes`].
    pub fn subscribe_changes(&self, observer: impl Fn(&Value) + 'static) -> Subscription {
        self.cell.subscribe_changes(observer)
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("current", &self.cell.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
