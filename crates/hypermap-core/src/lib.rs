//! Hypermap Core - Type-directed value resolution over a mapper hypergraph.
//!
//! This crate lets independently written plugins register *mappers*: typed
//! functions from a set of input tags to one output tag. Given the values a
//! caller already holds and the tag it wants, the resolver finds the cheapest
//! chain of mappers that reaches the target and runs it.
//!
//! # Architecture
//!
//! The core crate is organized into several modules:
//!
//! - [`tag`] and [`value`]: type tags, type-erased values, the per-request available set
//! - [`mapper`]: mapper descriptors and the function contract
//! - [`registry`] and [`plugin`]: registration, duplicate handling, sealing
//! - [`graph`]: the forward-chaining closure over the hypergraph
//! - [`plan`]: plan reconstruction from closure provenance
//! - [`resolver`]: plan execution, cancellation, the cross-call [`cache`]
//! - [`runtime`]: the serve boundary and its failure statuses
//! - [`config`] and [`error`]: configuration and the error type
//!
//! # Example
//!
//! ```rust
//! use hypermap_core::{AvailableSet, MapperDescriptor, MapperRegistry, Resolver, TypeTag, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> hypermap_core::Result<()> {
//! let mut registry = MapperRegistry::new();
//! registry.register(MapperDescriptor::sync("a", ["raw"], "normalized", |args| {
//!     let raw = args[0].downcast_ref::<String>().cloned().unwrap_or_default();
//!     Ok(Value::new(raw.to_lowercase()))
//! }))?;
//! registry.register(MapperDescriptor::sync("b", ["normalized", "flag"], "final", |args| {
//!     let text = args[0].downcast_ref::<String>().cloned().unwrap_or_default();
//!     let loud = args[1].downcast_ref::<bool>().copied().unwrap_or(false);
//!     Ok(Value::new(if loud { format!("{text}!") } else { text }))
//! }))?;
//!
//! let resolver = Resolver::new(registry.seal());
//! let available = AvailableSet::new()
//!     .with("raw", Value::new(String::from("HELLO")))
//!     .with("flag", Value::new(true));
//!
//! let resolution = resolver.resolve(available, &TypeTag::from("final")).await?;
//! assert_eq!(resolution.plan().mapper_names(), vec!["a", "b"]);
//! assert_eq!(resolution.downcast_ref::<String>().map(String::as_str), Some("hello!"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod plan;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod tag;
pub mod value;

// Re-export core types for convenience
pub use cache::{CacheKey, PureCache};
pub use config::{CONFIG_FILE_NAME, DuplicatePolicy, ResolverConfig};
pub use error::{HypermapError, Result};
pub use graph::{Closure, Provenance, ResolutionGraph};
pub use mapper::{Mapper, MapperDescriptor, MapperFn, MapperFuture, MapperId};
pub use plan::{PlanStep, ResolutionPlan};
pub use plugin::{Plugin, StaticPlugin};
pub use registry::{MapperRegistry, SealedRegistry};
pub use resolver::{Resolution, Resolver};
pub use runtime::{
    Boundary, BoundaryFailure, BoundaryRequest, BoundaryResponse, BoundaryStatus, ServeRuntime,
};
pub use tag::TypeTag;
pub use tokio_util::sync::CancellationToken;
pub use value::{AvailableSet, Value};
