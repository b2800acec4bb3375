//! Type-erased values and the per-request available set.
//!
//! Values cross the resolver as `Arc<dyn Any + Send + Sync>`; the tag they are
//! stored under carries the semantic type, and callers downcast at the edges.

use crate::tag::TypeTag;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Keys};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

type Erased = dyn Any + Send + Sync;

/// A type-erased, cheaply clonable value.
///
/// A value may carry a fingerprint of its contents (see [`Value::hashed`]).
/// Only fingerprinted values can take part in the cross-call cache.
#[derive(Clone)]
pub struct Value {
    inner: Arc<Erased>,
    type_name: &'static str,
    fingerprint: Option<u64>,
    eq: Option<fn(&Erased, &Erased) -> bool>,
}

fn erased_eq<T: Any + Eq>(a: &Erased, b: &Erased) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl Value {
    /// Wraps a value without a fingerprint.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            fingerprint: None,
            eq: None,
        }
    }

    /// Wraps a value and records a fingerprint of its contents.
    ///
    /// The fingerprint mixes in the Rust type so equal bytes of different
    /// types never collide by construction. Values of the same type may still
    /// share a fingerprint, so [`Value::content_eq`] compares the contents
    /// themselves.
    pub fn hashed<T: Any + Send + Sync + Hash + Eq>(value: T) -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<T>().hash(&mut hasher);
        value.hash(&mut hasher);
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            fingerprint: Some(hasher.finish()),
            eq: Some(erased_eq::<T>),
        }
    }

    /// Borrows the value as `T` if that is its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Returns a shared handle to the value as `T` if that is its concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Returns `true` if the concrete type is `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Name of the concrete Rust type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Content fingerprint, when the value was built with [`Value::hashed`].
    pub fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Returns `true` if both values were built with [`Value::hashed`] and
    /// hold equal contents of the same type.
    pub fn content_eq(&self, other: &Value) -> bool {
        if self.ptr_eq(other) {
            return self.eq.is_some();
        }
        match self.eq {
            Some(eq) if self.fingerprint == other.fingerprint => eq(&*self.inner, &*other.inner),
            _ => false,
        }
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.type_name)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Values known to one resolution request, keyed by tag.
///
/// The set starts with what the caller supplied and only grows while a
/// resolution runs.
#[derive(Debug, Clone, Default)]
pub struct AvailableSet {
    values: HashMap<TypeTag, Value>,
}

impl AvailableSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder style. Replaces any value already stored under `tag`.
    #[must_use]
    pub fn with(mut self, tag: impl Into<TypeTag>, value: Value) -> Self {
        self.values.insert(tag.into(), value);
        self
    }

    /// Stores a value, returning the one it replaced.
    pub fn insert(&mut self, tag: impl Into<TypeTag>, value: Value) -> Option<Value> {
        self.values.insert(tag.into(), value)
    }

    /// Looks up the value stored under `tag`.
    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.values.get(tag)
    }

    /// Returns `true` if a value is stored under `tag`.
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// Iterates over the stored tags in no particular order.
    pub fn tags(&self) -> Keys<'_, TypeTag, Value> {
        self.values.keys()
    }

    /// Stored tags in sorted order.
    pub fn sorted_tags(&self) -> Vec<TypeTag> {
        let mut tags: Vec<TypeTag> = self.values.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Into<TypeTag>> FromIterator<(T, Value)> for AvailableSet {
    fn from_iter<I: IntoIterator<Item = (T, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(t, v)| (t.into(), v)).collect(),
        }
    }
}
