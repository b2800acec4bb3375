//! Plugin registration surface.
//!
//! Plugins hand their mappers to the registry in one batch at load time.
//! The registry records the plugin name on every descriptor so logs and
//! diagnostics can say where a mapper came from.

use crate::mapper::MapperDescriptor;

/// A unit of mapper registrations, typically one loaded plugin.
pub trait Plugin: Send + Sync {
    /// Plugin name recorded as the source of its mappers.
    fn name(&self) -> &str;

    /// Mappers contributed by the plugin, in registration order.
    fn mappers(&self) -> Vec<MapperDescriptor>;
}

/// Plugin built from a fixed list of descriptors.
///
/// # Examples
///
/// ```
/// use hypermap_core::{MapperDescriptor, MapperRegistry, StaticPlugin, Value};
///
/// let plugin = StaticPlugin::new("guests")
///     .with_mapper(MapperDescriptor::sync("detect", ["machine"], "guest", |_| Ok(Value::new("linux"))));
///
/// let mut registry = MapperRegistry::new();
/// registry.register_plugin(&plugin)?;
/// assert_eq!(registry.len(), 1);
/// # Ok::<(), hypermap_core::HypermapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct StaticPlugin {
    name: String,
    mappers: Vec<MapperDescriptor>,
}

impl StaticPlugin {
    /// Creates a plugin with no mappers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mappers: Vec::new(),
        }
    }

    /// Adds a mapper, builder style.
    #[must_use]
    pub fn with_mapper(mut self, mapper: MapperDescriptor) -> Self {
        self.mappers.push(mapper);
        self
    }

    /// Adds a mapper.
    pub fn push(&mut self, mapper: MapperDescriptor) {
        self.mappers.push(mapper);
    }
}

impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn mappers(&self) -> Vec<MapperDescriptor> {
        self.mappers.clone()
    }
}
