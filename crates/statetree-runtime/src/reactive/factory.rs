#![forbid(unsafe_code)]

//! Child factories and the context they are built under.
//!
//! A [`FactoryMap`] describes the shape of a composite: each key maps to a
//! [`Factory`] that either builds a child directly or is itself a nested map
//! (a sub-composite). Every factory call receives the child's seed slice and
//! a [`FactoryContext`] carrying user options, the merge policy, and a weak
//! reference to the composite that started the build.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use statetree_core::{ConfigurationError, MergePolicy, Value, is_reserved_key};

use super::composite::{Child, Composite, CompositeRef};
use super::controller::ControllerDef;

type BuildFn = dyn Fn(Value, &FactoryContext) -> Child;

/// Arguments forwarded to every factory in a tree.
///
/// A nested sub-composite passes the context it received to its own
/// children unchanged, so [`parent`](Self::parent) always refers to the
/// composite at the root of the build.
#[derive(Clone, Default)]
pub struct FactoryContext {
    options: Value,
    parent: Option<CompositeRef>,
    merge: MergePolicy,
}

impl FactoryContext {
    /// A context carrying `options` and the default merge policy.
    pub fn new(options: impl Into<Value>) -> Self {
        Self {
            options: options.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_merge_policy(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    /// User options passed to the root builder.
    #[must_use]
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// The root composite of the build.
    ///
    /// `None` while that composite is still being constructed, or once it
    /// has been dropped.
    #[must_use]
    pub fn parent(&self) -> Option<Composite> {
        self.parent.as_ref().and_then(CompositeRef::upgrade)
    }

    #[must_use]
    pub fn parent_ref(&self) -> Option<&CompositeRef> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn merge_policy(&self) -> &MergePolicy {
        &self.merge
    }

    /// This context with `parent` recorded as the root, unless one is
    /// already set.
    pub(crate) fn rooted_at(&self, parent: CompositeRef) -> Self {
        let mut ctx = self.clone();
        if ctx.parent.is_none() {
            ctx.parent = Some(parent);
        }
        ctx
    }
}

impl fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryContext")
            .field("options", &self.options)
            .field("has_parent", &self.parent.is_some())
            .field("merge", &self.merge.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// How one child of a composite is produced.
#[derive(Clone)]
pub enum Factory {
    /// Build a child from `(seed, context)`.
    Build(Rc<BuildFn>),
    /// Build a sub-composite from a nested map.
    Nested(FactoryMap),
}

impl Factory {
    /// Wrap a closure producing any child type.
    pub fn leaf<C, F>(f: F) -> Self
    where
        C: Into<Child>,
        F: Fn(Value, &FactoryContext) -> C + 'static,
    {
        Self::Build(Rc::new(move |seed, ctx| f(seed, ctx).into()))
    }

    #[must_use]
    pub fn nested(map: FactoryMap) -> Self {
        Self::Nested(map)
    }

    /// Produce a child seeded with `seed`.
    #[must_use]
    pub fn build(&self, seed: Value, ctx: &FactoryContext) -> Child {
        match self {
            Self::Build(f) => f(seed, ctx),
            Self::Nested(map) => Child::Composite(Composite::assemble(map, seed, ctx)),
        }
    }
}

impl From<FactoryMap> for Factory {
    fn from(map: FactoryMap) -> Self {
        Self::Nested(map)
    }
}

impl From<ControllerDef> for Factory {
    fn from(def: ControllerDef) -> Self {
        def.factory()
    }
}

impl From<&ControllerDef> for Factory {
    fn from(def: &ControllerDef) -> Self {
        def.factory()
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(_) => f.write_str("Factory::Build"),
            Self::Nested(map) => f.debug_tuple("Factory::Nested").field(map).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// FactoryMap
// ---------------------------------------------------------------------------

/// Ordered `key -> Factory` description of a composite.
#[derive(Clone, Default)]
pub struct FactoryMap {
    entries: IndexMap<String, Factory>,
}

impl FactoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, factory: impl Into<Factory>) -> Self {
        self.insert(key, factory);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, factory: impl Into<Factory>) {
        self.entries.insert(key.into(), factory.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Factory> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Factory)> {
        self.entries.iter().map(|(k, f)| (k.as_str(), f))
    }

    /// Reject reserved keys at any nesting depth.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, factory) in &self.entries {
            if is_reserved_key(key) {
                return Err(ConfigurationError::ReservedKey { key: key.clone() });
            }
            if let Factory::Nested(map) = factory {
                map.validate()?;
            }
        }
        Ok(())
    }
}

impl<K, F> FromIterator<(K, F)> for FactoryMap
where
    K: Into<String>,
    F: Into<Factory>,
{
    fn from_iter<I: IntoIterator<Item = (K, F)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, factory) in iter {
            map.insert(key, factory);
        }
        map
    }
}

impl fmt::Debug for FactoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// A reusable factory producing sub-composites of `factories`.
///
/// The map is validated here, once. Each built composite is seeded with the
/// slice it receives, or with `default_initial` when that slice is
/// `Undefined`.
pub fn compose(
    factories: FactoryMap,
    default_initial: impl Into<Value>,
) -> Result<Factory, ConfigurationError> {
    factories.validate()?;
    let default_initial = default_initial.into();
    Ok(Factory::leaf(move |seed: Value, ctx: &FactoryContext| {
        let seed = if seed.is_undefined() {
            default_initial.clone()
        } else {
            seed
        };
        Composite::assemble(&factories, seed, ctx)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Controller;

    fn leaf() -> Factory {
        Factory::leaf(|seed: Value, _: &FactoryContext| Controller::new(seed))
    }

    #[test]
    fn validate_rejects_reserved_top_level_key() {
        let map = FactoryMap::new().with("ok", leaf()).with("changes", leaf());
        assert_eq!(
            map.validate(),
            Err(ConfigurationError::ReservedKey {
                key: "changes".into()
            })
        );
    }

    #[test]
    fn validate_rejects_reserved_nested_key() {
        let inner = FactoryMap::new().with("state", leaf());
        let map = FactoryMap::new().with("outer", inner);
        assert!(matches!(
            map.validate(),
            Err(ConfigurationError::ReservedKey { key }) if key == "state"
        ));
    }

    #[test]
    fn compose_validates_eagerly() {
        let bad = FactoryMap::new().with("state", leaf());
        assert!(compose(bad, Value::Undefined).is_err());
    }

    #[test]
    fn from_iterator_keeps_order() {
        let map: FactoryMap = [("b", leaf()), ("a", leaf())].into_iter().collect();
        assert_eq!(map.keys().collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn context_keeps_existing_root() {
        let first = Composite::new(FactoryMap::new(), None).unwrap();
        let second = Composite::new(FactoryMap::new(), None).unwrap();
        let ctx = FactoryContext::new(1).rooted_at(first.downgrade());
        let again = ctx.rooted_at(second.downgrade());
        assert!(again.parent().is_some_and(|p| p.ptr_eq(&first)));
        assert_eq!(again.options(), &Value::from(1));
    }
}
