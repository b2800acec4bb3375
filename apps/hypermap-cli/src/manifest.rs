//! Declarative mapper manifests.
//!
//! A manifest lists mappers as TOML tables. Every entry becomes a trace mapper
//! whose output is `"<output>(<inputs>)"`, which is enough to exercise planning
//! and execution from the command line.
//!
//! ```toml
//! [[mapper]]
//! name = "a"
//! inputs = ["raw"]
//! output = "normalized"
//! plugin = "text"
//! ```

use anyhow::{Context, Result};
use hypermap_core::{HypermapError, MapperDescriptor, MapperRegistry, Plugin, StaticPlugin, Value};
use serde::Deserialize;
use std::path::Path;

/// Default manifest file name.
pub const MANIFEST_FILE_NAME: &str = "mappers.toml";

/// Parsed manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, rename = "mapper")]
    pub mappers: Vec<MapperEntry>,
}

/// One `[[mapper]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperEntry {
    pub name: String,
    pub inputs: Vec<String>,
    pub output: String,

    /// Makes the mapper fail when invoked.
    #[serde(default)]
    pub fail: bool,

    #[serde(default)]
    pub pure: bool,

    /// Groups the mapper under a plugin; ungrouped mappers register directly.
    #[serde(default)]
    pub plugin: Option<String>,
}

impl Manifest {
    /// Reads and parses a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    /// Parses manifest TOML.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HypermapError::InvalidManifest(e.to_string()).into())
    }

    /// Registers every entry in file order.
    ///
    /// A plugin's entries register together, as one atomic group, at the
    /// position of the plugin's first entry. Registration order is the
    /// planner's tie-break order, so the file decides which of two equally
    /// cheap mappers wins.
    pub fn register_into(&self, registry: &mut MapperRegistry) -> Result<()> {
        enum Unit<'a> {
            Mapper(&'a MapperEntry),
            Plugin(usize),
        }

        let mut units: Vec<Unit<'_>> = Vec::new();
        let mut plugins: Vec<StaticPlugin> = Vec::new();

        for entry in &self.mappers {
            match &entry.plugin {
                None => units.push(Unit::Mapper(entry)),
                Some(plugin) => match plugins.iter().position(|p| p.name() == plugin.as_str()) {
                    Some(idx) => plugins[idx].push(entry.descriptor()),
                    None => {
                        units.push(Unit::Plugin(plugins.len()));
                        plugins.push(StaticPlugin::new(plugin.clone()).with_mapper(entry.descriptor()));
                    }
                },
            }
        }

        for unit in units {
            match unit {
                Unit::Mapper(entry) => registry
                    .register(entry.descriptor())
                    .with_context(|| format!("Failed to register mapper `{}`", entry.name))?,
                Unit::Plugin(idx) => {
                    let plugin = &plugins[idx];
                    registry
                        .register_plugin(plugin)
                        .with_context(|| format!("Failed to register plugin `{}`", plugin.name()))?;
                }
            }
        }
        Ok(())
    }
}

impl MapperEntry {
    /// Builds the trace mapper for this entry.
    pub fn descriptor(&self) -> MapperDescriptor {
        let output = self.output.clone();
        let name = self.name.clone();
        let fail = self.fail;

        let descriptor = MapperDescriptor::sync(
            self.name.clone(),
            self.inputs.iter().cloned(),
            self.output.clone(),
            move |args| {
                if fail {
                    anyhow::bail!("mapper `{name}` is configured to fail");
                }
                let parts: Vec<String> = args.iter().map(render).collect();
                Ok(Value::hashed(format!("{output}({})", parts.join(", "))))
            },
        );

        if self.pure { descriptor.pure() } else { descriptor }
    }
}

/// Renders a value produced by the CLI as text.
pub fn render(value: &Value) -> String {
    value
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| format!("<{}>", value.type_name()))
}
