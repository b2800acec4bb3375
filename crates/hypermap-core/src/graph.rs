//! Directed hypergraph view over a sealed registry.
//!
//! Nodes are type tags; each mapper is a hyperedge from its input tags to its
//! output tag. A mapper fires only when *all* of its inputs are satisfied, so
//! reachability is computed by forward chaining to a fixpoint rather than by
//! single-predecessor shortest paths.
//!
//! The closure is computed in layers. Layer 0 holds the base tags. A mapper
//! becomes ready in layer `n` when the last of its inputs was satisfied in
//! layer `n - 1`, so the layer a tag lands in equals `1 + max(cost of
//! inputs)` along its cheapest derivation. Within a layer, ready mappers are
//! visited in registration order and the first one to reach an unsatisfied
//! tag becomes its provenance.

use crate::mapper::MapperId;
use crate::registry::SealedRegistry;
use crate::tag::TypeTag;
use std::collections::{BTreeSet, HashMap};

/// How a tag became satisfied during a closure computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    /// Hop count: 0 for base tags, otherwise `1 + max(cost of inputs)`.
    pub cost: usize,

    /// Mapper that produced the tag; `None` for base tags.
    pub via: Option<MapperId>,
}

/// Result of a forward-chaining run.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    satisfied: HashMap<TypeTag, Provenance>,
}

impl Closure {
    /// Provenance of `tag`, if it was reached.
    pub fn provenance(&self, tag: &str) -> Option<Provenance> {
        self.satisfied.get(tag).copied()
    }

    /// Returns `true` if `tag` was reached.
    pub fn contains(&self, tag: &str) -> bool {
        self.satisfied.contains_key(tag)
    }

    /// Every reached tag, sorted.
    pub fn tags(&self) -> BTreeSet<TypeTag> {
        self.satisfied.keys().cloned().collect()
    }

    /// Number of reached tags.
    pub fn len(&self) -> usize {
        self.satisfied.len()
    }

    /// Returns `true` if nothing was reached.
    pub fn is_empty(&self) -> bool {
        self.satisfied.is_empty()
    }
}

/// Read-only hypergraph over the mappers of a [`SealedRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct ResolutionGraph<'a> {
    registry: &'a SealedRegistry,
}

impl<'a> ResolutionGraph<'a> {
    /// Wraps a sealed registry.
    pub fn new(registry: &'a SealedRegistry) -> Self {
        Self { registry }
    }

    /// The registry this graph is derived from.
    pub fn registry(&self) -> &'a SealedRegistry {
        self.registry
    }

    /// Forward-chains from `base` until `target` is satisfied or nothing new
    /// can be reached.
    ///
    /// With `target = None` the full fixpoint is computed. Never invokes a
    /// mapper.
    pub fn closure<'t, I>(&self, base: I, target: Option<&str>) -> Closure
    where
        I: IntoIterator<Item = &'t TypeTag>,
    {
        let mappers = self.registry.mappers();
        let mut satisfied: HashMap<TypeTag, Provenance> = HashMap::new();
        let mut pending: Vec<usize> = mappers.iter().map(|m| m.inputs().len()).collect();

        let mut newly: Vec<TypeTag> = Vec::new();
        for tag in base {
            if satisfied
                .insert(tag.clone(), Provenance { cost: 0, via: None })
                .is_none()
            {
                newly.push(tag.clone());
            }
        }

        if target.is_some_and(|t| satisfied.contains_key(t)) {
            return Closure { satisfied };
        }

        let mut layer = 0;
        loop {
            let mut ready: Vec<MapperId> = Vec::new();
            for tag in newly.drain(..) {
                for &id in self.registry.consumer_ids(tag.as_str()) {
                    pending[id.index()] -= 1;
                    if pending[id.index()] == 0 {
                        ready.push(id);
                    }
                }
            }

            if ready.is_empty() {
                break;
            }

            layer += 1;
            ready.sort_unstable();

            for id in ready {
                let output = mappers[id.index()].output();
                if satisfied.contains_key(output.as_str()) {
                    continue;
                }

                satisfied.insert(
                    output.clone(),
                    Provenance {
                        cost: layer,
                        via: Some(id),
                    },
                );

                if target == Some(output.as_str()) {
                    return Closure { satisfied };
                }
                newly.push(output.clone());
            }
        }

        Closure { satisfied }
    }

    /// Every tag reachable from `base`, base tags included.
    pub fn reachable_from<'t, I>(&self, base: I) -> BTreeSet<TypeTag>
    where
        I: IntoIterator<Item = &'t TypeTag>,
    {
        self.closure(base, None).tags()
    }

    /// Tags no mapper produces; these can only ever come from callers.
    pub fn source_tags(&self) -> BTreeSet<&'a TypeTag> {
        let produced = self.registry.produced_tags();
        self.registry
            .consumed_tags()
            .into_iter()
            .filter(|t| !produced.contains(t))
            .collect()
    }

    /// Tags no mapper consumes; these are final products of the graph.
    pub fn sink_tags(&self) -> BTreeSet<&'a TypeTag> {
        let consumed = self.registry.consumed_tags();
        self.registry
            .produced_tags()
            .into_iter()
            .filter(|t| !consumed.contains(t))
            .collect()
    }
}
