#![forbid(unsafe_code)]

//! Merge policies: how a child's new value is folded into its parent.
//!
//! A composite recomputes its aggregate as `merge(parent, {key: child})`.
//! The function doing that fold is a [`MergePolicy`], injectable at
//! construction time.
//!
//! | Policy | `Undefined` in patch | Nested objects |
//! |---|---|---|
//! | [`shallow_assign`] (default) | stored as-is | replaced |
//! | [`deep_merge_with_delete`] | key removed | merged recursively |
//!
//! Neither policy mutates its inputs.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::ConfigurationError;
use crate::value::{Map, Value};

type MergeFn = dyn Fn(&Value, &Value) -> Value;

/// A named `(parent, patch) -> parent'` function.
///
/// Cloning shares the underlying function.
#[derive(Clone)]
pub struct MergePolicy {
    name: Rc<str>,
    merge: Rc<MergeFn>,
}

impl MergePolicy {
    /// `{...parent, ...patch}`. This is the default.
    #[must_use]
    pub fn shallow_assign() -> Self {
        Self::custom(MergePolicyKind::ShallowAssign.as_str(), shallow_assign)
    }

    /// Recursive merge that drops keys whose merged value is `Undefined`.
    #[must_use]
    pub fn deep_merge_with_delete() -> Self {
        Self::custom(
            MergePolicyKind::DeepMergeWithDelete.as_str(),
            deep_merge_with_delete,
        )
    }

    /// Wrap an arbitrary merge function.
    pub fn custom(name: impl Into<Rc<str>>, merge: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            merge: Rc::new(merge),
        }
    }

    /// Merge `patch` into `parent`.
    #[must_use]
    pub fn apply(&self, parent: &Value, patch: &Value) -> Value {
        (self.merge)(parent, patch)
    }

    /// Merge a single `key: value` entry into `parent`.
    #[must_use]
    pub fn apply_entry(&self, parent: &Value, key: &str, value: Value) -> Value {
        self.apply(parent, &Value::object([(key, value)]))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::shallow_assign()
    }
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergePolicy")
            .field("name", &self.name)
            .finish()
    }
}

/// Built-in policies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicyKind {
    #[default]
    ShallowAssign,
    DeepMergeWithDelete,
}

impl MergePolicyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShallowAssign => "shallow-assign",
            Self::DeepMergeWithDelete => "deep-merge-with-delete",
        }
    }

    #[must_use]
    pub fn policy(self) -> MergePolicy {
        match self {
            Self::ShallowAssign => MergePolicy::shallow_assign(),
            Self::DeepMergeWithDelete => MergePolicy::deep_merge_with_delete(),
        }
    }
}

impl fmt::Display for MergePolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergePolicyKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shallow-assign" | "shallow" | "assign" => Ok(Self::ShallowAssign),
            "deep-merge-with-delete" | "deep" | "deep-merge" => Ok(Self::DeepMergeWithDelete),
            other => Err(ConfigurationError::UnknownMergePolicy {
                name: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// `{...parent, ...patch}` into a new object.
///
/// An explicit `Undefined` in `patch` is stored; the key is not deleted.
/// A non-object `patch` replaces `parent`; a non-object `parent` is treated
/// as empty.
#[must_use]
pub fn shallow_assign(parent: &Value, patch: &Value) -> Value {
    let Some(entries) = patch.as_object() else {
        return patch.clone();
    };
    let mut map = parent.as_object().cloned().unwrap_or_default();
    for (key, value) in entries {
        map.insert(key.clone(), value.clone());
    }
    Value::Object(Rc::new(map))
}

/// Recursive merge; keys whose merged value is `Undefined` are removed at
/// every level, including inside objects the patch introduces.
///
/// Arrays are replaced, not merged. When nothing changes, `parent` is
/// returned as-is so identity-based change filters stay quiet.
#[must_use]
pub fn deep_merge_with_delete(parent: &Value, patch: &Value) -> Value {
    let Some(entries) = patch.as_object() else {
        return patch.clone();
    };
    let Some(base) = parent.as_object() else {
        return prune_undefined(patch);
    };

    let mut out = base.clone();
    let mut changed = false;
    for (key, incoming) in entries {
        let merged = match out.get(key) {
            Some(existing) if existing.is_object() && incoming.is_object() => {
                deep_merge_with_delete(existing, incoming)
            }
            _ => prune_undefined(incoming),
        };
        if merged.is_undefined() {
            changed |= out.shift_remove(key).is_some();
        } else {
            let previous = out.insert(key.clone(), merged.clone());
            changed |= !previous.is_some_and(|p| p.is_same(&merged));
        }
    }

    if changed {
        Value::Object(Rc::new(out))
    } else {
        parent.clone()
    }
}

/// Strip `Undefined` fields recursively, sharing untouched subtrees.
fn prune_undefined(value: &Value) -> Value {
    let Some(map) = value.as_object() else {
        return value.clone();
    };
    if !map.values().any(|v| v.is_undefined() || v.is_object()) {
        return value.clone();
    }

    let mut changed = false;
    let mut out = Map::with_capacity(map.len());
    for (key, item) in map {
        if item.is_undefined() {
            changed = true;
            continue;
        }
        let pruned = prune_undefined(item);
        changed |= !pruned.is_same(item);
        out.insert(key.clone(), pruned);
    }

    if changed {
        Value::Object(Rc::new(out))
    } else {
        value.clone()
    }
}
