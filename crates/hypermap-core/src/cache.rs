//! Opt-in memo of pure mapper outputs shared across resolution calls.
//!
//! Within a single call the available set already guarantees no tag is
//! computed twice. This cache only matters across calls. Entries are found by
//! the mapper id plus the fingerprints of the concrete inputs, then confirmed
//! by comparing the inputs themselves, so a fingerprint collision misses
//! instead of serving another input's output.

use crate::mapper::{Mapper, MapperId};
use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Cache key: mapper identity plus the inputs in declaration order.
///
/// Hashes by input fingerprints; equality also compares input contents.
#[derive(Debug, Clone)]
pub struct CacheKey {
    mapper: MapperId,
    fingerprints: Vec<u64>,
    inputs: Vec<Value>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.mapper == other.mapper
            && self.fingerprints == other.fingerprints
            && self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&other.inputs)
                .all(|(a, b)| a.content_eq(b))
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mapper.hash(state);
        self.fingerprints.hash(state);
    }
}

impl CacheKey {
    /// Builds the key for invoking `mapper` with `inputs`.
    ///
    /// Returns `None` when the mapper is not pure or any input lacks a
    /// fingerprint; such invocations are never cached.
    pub fn for_invocation(mapper: &Mapper, inputs: &[Value]) -> Option<Self> {
        if !mapper.is_pure() {
            return None;
        }
        let fingerprints = inputs
            .iter()
            .map(Value::fingerprint)
            .collect::<Option<Vec<u64>>>()?;
        Some(Self {
            mapper: mapper.id(),
            fingerprints,
            inputs: inputs.to_vec(),
        })
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, Value>,
    order: VecDeque<CacheKey>,
}

/// Bounded cross-call cache for pure mappers.
///
/// When full, the oldest entry is evicted first. Safe to share between
/// concurrent resolutions.
#[derive(Debug)]
pub struct PureCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl PureCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached output for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.lock().entries.get(key).cloned()
    }

    /// Stores an output, evicting the oldest entry if the cache is full.
    pub fn insert(&self, key: CacheKey, value: Value) {
        let mut inner = self.lock();
        if inner.entries.insert(key.clone(), value).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
