//! Mapper registry: open during plugin loading, sealed before serving.
//!
//! [`MapperRegistry`] collects descriptors during the startup phase.
//! [`MapperRegistry::seal`] freezes them into a [`SealedRegistry`], an
//! immutable, indexed snapshot shared by every resolution. Registration after
//! sealing fails with `HypermapError::SealedRegistryMutation`.

use crate::config::DuplicatePolicy;
use crate::error::{HypermapError, Result};
use crate::graph::ResolutionGraph;
use crate::mapper::{Mapper, MapperDescriptor, MapperId};
use crate::plugin::Plugin;
use crate::tag::TypeTag;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Registry accepting mapper registrations until it is sealed.
#[derive(Debug, Default)]
pub struct MapperRegistry {
    policy: DuplicatePolicy,
    mappers: Vec<MapperDescriptor>,
    sealed: Option<Arc<SealedRegistry>>,
}

impl MapperRegistry {
    /// Creates an empty registry that rejects duplicates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with the given duplicate policy.
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Active duplicate policy.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Registers one descriptor.
    ///
    /// Two descriptors are duplicates when they share the same input set and
    /// output. What happens then depends on the policy: `Reject` fails,
    /// `FirstWins` keeps the earlier one, `LastWins` replaces it in its
    /// original slot.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `HypermapError::SealedRegistryMutation` once the registry is sealed
    /// - `HypermapError::InvalidMapper` if the descriptor is malformed
    /// - `HypermapError::DuplicateMapper` under the `Reject` policy
    /// - `HypermapError::DuplicateMapperName` if a different mapper already
    ///   uses the name
    pub fn register(&mut self, descriptor: MapperDescriptor) -> Result<()> {
        if self.sealed.is_some() {
            return Err(HypermapError::SealedRegistryMutation(
                descriptor.name().to_string(),
            ));
        }

        descriptor.validate()?;

        let signature = descriptor.signature();
        let existing = self.mappers.iter().position(|m| m.signature() == signature);

        match (existing, self.policy) {
            (None, _) => {
                self.ensure_unique_name(&descriptor, None)?;
                tracing::debug!(
                    mapper = descriptor.name(),
                    output = %descriptor.output(),
                    "registered mapper"
                );
                self.mappers.push(descriptor);
            }
            (Some(_), DuplicatePolicy::Reject) => {
                return Err(HypermapError::DuplicateMapper {
                    name: descriptor.name().to_string(),
                    inputs: descriptor.inputs().to_vec(),
                    output: descriptor.output().clone(),
                });
            }
            (Some(pos), DuplicatePolicy::FirstWins) => {
                tracing::warn!(
                    kept = self.mappers[pos].name(),
                    dropped = descriptor.name(),
                    "duplicate mapper ignored"
                );
            }
            (Some(pos), DuplicatePolicy::LastWins) => {
                self.ensure_unique_name(&descriptor, Some(pos))?;
                tracing::warn!(
                    replaced = self.mappers[pos].name(),
                    by = descriptor.name(),
                    "duplicate mapper replaced"
                );
                self.mappers[pos] = descriptor;
            }
        }

        Ok(())
    }

    /// Fails if a mapper other than the one at `replacing` already uses the
    /// descriptor's name.
    fn ensure_unique_name(&self, descriptor: &MapperDescriptor, replacing: Option<usize>) -> Result<()> {
        let taken = self
            .mappers
            .iter()
            .enumerate()
            .any(|(pos, m)| Some(pos) != replacing && m.name() == descriptor.name());
        if taken {
            return Err(HypermapError::DuplicateMapperName(
                descriptor.name().to_string(),
            ));
        }
        Ok(())
    }

    /// Registers every mapper a plugin contributes, tagging each with the
    /// plugin name.
    ///
    /// Registration is all-or-nothing: if any descriptor is rejected, none of
    /// the plugin's mappers stay registered.
    ///
    /// # Errors
    ///
    /// Returns the first error [`MapperRegistry::register`] reports.
    #[tracing::instrument(skip_all, fields(plugin = plugin.name()))]
    pub fn register_plugin(&mut self, plugin: &dyn Plugin) -> Result<()> {
        let mappers = plugin.mappers();
        let names: Vec<&str> = mappers.iter().map(MapperDescriptor::name).collect();
        tracing::info!(mappers = ?names, "collected mappers from plugin");

        let snapshot = self.mappers.clone();
        for descriptor in mappers {
            if let Err(e) = self.register(descriptor.with_source(plugin.name())) {
                tracing::error!(error = %e, "plugin registration failed");
                self.mappers = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of registered mappers.
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// Returns `true` once [`MapperRegistry::seal`] has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Freezes the registry and returns the shared snapshot.
    ///
    /// Calling `seal` again returns the same snapshot.
    #[tracing::instrument(skip_all)]
    pub fn seal(&mut self) -> Arc<SealedRegistry> {
        if let Some(sealed) = &self.sealed {
            return Arc::clone(sealed);
        }

        let sealed = Arc::new(SealedRegistry::build(self.mappers.clone(), self.policy));
        tracing::info!(
            mappers = sealed.len(),
            tags = sealed.tags().len(),
            "mapper registry sealed"
        );
        self.sealed = Some(Arc::clone(&sealed));
        sealed
    }
}

/// Immutable, indexed set of mappers.
///
/// Safe to share across threads; nothing in it changes after construction.
#[derive(Debug)]
pub struct SealedRegistry {
    policy: DuplicatePolicy,
    mappers: Vec<Mapper>,
    by_output: HashMap<TypeTag, Vec<MapperId>>,
    by_input: HashMap<TypeTag, Vec<MapperId>>,
}

impl SealedRegistry {
    fn build(descriptors: Vec<MapperDescriptor>, policy: DuplicatePolicy) -> Self {
        let mut by_output: HashMap<TypeTag, Vec<MapperId>> = HashMap::new();
        let mut by_input: HashMap<TypeTag, Vec<MapperId>> = HashMap::new();

        let mappers: Vec<Mapper> = descriptors
            .into_iter()
            .enumerate()
            .map(|(idx, descriptor)| Mapper::new(MapperId(idx), descriptor))
            .collect();

        for mapper in &mappers {
            by_output
                .entry(mapper.output().clone())
                .or_default()
                .push(mapper.id());
            for input in mapper.inputs() {
                by_input.entry(input.clone()).or_default().push(mapper.id());
            }
        }

        Self {
            policy,
            mappers,
            by_output,
            by_input,
        }
    }

    /// Duplicate policy the registry was built under.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// All mappers in registration order.
    pub fn mappers(&self) -> &[Mapper] {
        &self.mappers
    }

    /// Looks up a mapper by id.
    pub fn get(&self, id: MapperId) -> Option<&Mapper> {
        self.mappers.get(id.0)
    }

    /// Mappers whose output is `tag`, in registration order.
    pub fn mappers_producing<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a Mapper> + use<'a> {
        self.indexed(self.by_output.get(tag))
    }

    /// Mappers that list `tag` among their inputs, in registration order.
    pub fn mappers_consuming<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a Mapper> + use<'a> {
        self.indexed(self.by_input.get(tag))
    }

    pub(crate) fn consumer_ids(&self, tag: &str) -> &[MapperId] {
        self.by_input.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    fn indexed<'a>(
        &'a self,
        ids: Option<&'a Vec<MapperId>>,
    ) -> impl Iterator<Item = &'a Mapper> + use<'a> {
        ids.into_iter()
            .flatten()
            .map(move |id| &self.mappers[id.0])
    }

    /// Every tag mentioned by any mapper, sorted.
    pub fn tags(&self) -> BTreeSet<&TypeTag> {
        self.by_output.keys().chain(self.by_input.keys()).collect()
    }

    /// Tags some mapper produces.
    pub fn produced_tags(&self) -> BTreeSet<&TypeTag> {
        self.by_output.keys().collect()
    }

    /// Tags some mapper consumes.
    pub fn consumed_tags(&self) -> BTreeSet<&TypeTag> {
        self.by_input.keys().collect()
    }

    /// Number of mappers.
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Returns `true` if no mapper is registered.
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// Hypergraph view over this registry.
    pub fn graph(&self) -> ResolutionGraph<'_> {
        ResolutionGraph::new(self)
    }
}
