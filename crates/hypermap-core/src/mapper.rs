//! Mapper descriptors: the hyperedges of the resolution graph.
//!
//! A mapper declares the tags it needs, the one tag it produces, and the
//! function that performs the conversion. Descriptors are built by plugins,
//! validated on registration, and never change afterwards.

use crate::error::{HypermapError, Result};
use crate::tag::TypeTag;
use crate::value::Value;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

/// Future returned by a mapper invocation.
pub type MapperFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Conversion function behind a mapper.
///
/// Receives one value per declared input, in declaration order, and yields
/// exactly one value for the declared output. Implemented for any
/// `Fn(Vec<Value>) -> impl Future<Output = anyhow::Result<Value>>`.
pub trait MapperFn: Send + Sync {
    /// Starts the conversion.
    fn call(&self, inputs: Vec<Value>) -> MapperFuture;
}

impl<F, Fut> MapperFn for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, inputs: Vec<Value>) -> MapperFuture {
        Box::pin(self(inputs))
    }
}

/// Identity assigned to a mapper when its registry is sealed.
///
/// Ids follow registration order, which is also the tie-break order used by
/// the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MapperId(pub(crate) usize);

impl MapperId {
    /// Registration ordinal.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for MapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declaration of one conversion: inputs, output and the function.
#[derive(Clone)]
pub struct MapperDescriptor {
    name: String,
    inputs: Vec<TypeTag>,
    output: TypeTag,
    pure: bool,
    source: Option<String>,
    func: Arc<dyn MapperFn>,
}

impl MapperDescriptor {
    /// Creates a descriptor around an async conversion function.
    ///
    /// # Examples
    ///
    /// ```
    /// use hypermap_core::{MapperDescriptor, Value};
    ///
    /// let normalize = MapperDescriptor::new("normalize", ["raw"], "normalized", |args| async move {
    ///     let raw = args[0].downcast_ref::<String>().cloned().unwrap_or_default();
    ///     Ok(Value::new(raw.trim().to_string()))
    /// });
    /// assert_eq!(normalize.output().as_str(), "normalized");
    /// ```
    pub fn new<I, T, F, Fut>(name: impl Into<String>, inputs: I, output: impl Into<TypeTag>, func: F) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::with_fn(name, inputs, output, func)
    }

    /// Creates a descriptor around any [`MapperFn`] implementation.
    pub fn with_fn<I, T>(
        name: impl Into<String>,
        inputs: I,
        output: impl Into<TypeTag>,
        func: impl MapperFn + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            pure: false,
            source: None,
            func: Arc::new(func),
        }
    }

    /// Creates a descriptor around a synchronous conversion function.
    ///
    /// Each call runs on tokio's blocking pool, so a resolution can be
    /// cancelled or time out while the function is still working. The
    /// abandoned call finishes in the background and its result is dropped.
    pub fn sync<I, T, F>(name: impl Into<String>, inputs: I, output: impl Into<TypeTag>, func: F) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, inputs, output, move |args: Vec<Value>| {
            let func = Arc::clone(&func);
            async move {
                tokio::task::spawn_blocking(move || func(args))
                    .await
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("mapper task did not complete: {e}")))
            }
        })
    }

    /// Marks the mapper as free of side effects, making it eligible for the
    /// cross-call cache.
    #[must_use]
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    pub(crate) fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Mapper name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs, in the order values are passed to the function.
    pub fn inputs(&self) -> &[TypeTag] {
        &self.inputs
    }

    /// Declared output.
    pub fn output(&self) -> &TypeTag {
        &self.output
    }

    /// Whether the mapper was marked pure.
    pub fn is_pure(&self) -> bool {
        self.pure
    }

    /// Plugin that contributed the mapper, if registered through one.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Input set and output, the key used for duplicate detection.
    pub fn signature(&self) -> (BTreeSet<TypeTag>, TypeTag) {
        (self.inputs.iter().cloned().collect(), self.output.clone())
    }

    /// Runs the conversion function.
    pub fn invoke(&self, inputs: Vec<Value>) -> MapperFuture {
        self.func.call(inputs)
    }

    /// Checks the structural rules every registered mapper must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::InvalidMapper` when the inputs are empty,
    /// repeat a tag, or contain the output.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| HypermapError::InvalidMapper {
            name: self.name.clone(),
            reason,
        };

        if self.inputs.is_empty() {
            return Err(invalid("no inputs declared".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for tag in &self.inputs {
            if !seen.insert(tag) {
                return Err(invalid(format!("input `{tag}` declared more than once")));
            }
        }

        if seen.contains(&self.output) {
            return Err(invalid(format!("output `{}` is also an input", self.output)));
        }

        Ok(())
    }
}

impl fmt::Debug for MapperDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperDescriptor")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("pure", &self.pure)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// A descriptor frozen into a sealed registry, together with its id.
#[derive(Debug, Clone)]
pub struct Mapper {
    id: MapperId,
    descriptor: MapperDescriptor,
}

impl Mapper {
    pub(crate) fn new(id: MapperId, descriptor: MapperDescriptor) -> Self {
        Self { id, descriptor }
    }

    /// Registry-assigned id.
    pub fn id(&self) -> MapperId {
        self.id
    }

    /// The underlying descriptor.
    pub fn descriptor(&self) -> &MapperDescriptor {
        &self.descriptor
    }
}

impl Deref for Mapper {
    type Target = MapperDescriptor;

    fn deref(&self) -> &Self::Target {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str, inputs: &[&str], output: &str) -> MapperDescriptor {
        MapperDescriptor::sync(name, inputs.iter().copied(), output, |_| Ok(Value::new(())))
    }

    #[test]
    fn test_validate_accepts_well_formed_mapper() {
        assert!(noop("b", &["normalized", "flag"], "final").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_inputs() {
        let err = noop("empty", &[], "final").validate().unwrap_err();
        assert!(matches!(err, HypermapError::InvalidMapper { ref name, .. } if name == "empty"));
    }

    #[test]
    fn test_validate_rejects_repeated_inputs() {
        let err = noop("twice", &["raw", "raw"], "final").validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_self_loop() {
        let err = noop("loop", &["raw", "final"], "final").validate().unwrap_err();
        assert!(err.to_string().contains("also an input"));
    }

    #[test]
    fn test_signature_ignores_input_order() {
        let a = noop("a", &["x", "y"], "z");
        let b = noop("b", &["y", "x"], "z");
        assert_eq!(a.signature(), b.signature());
    }

    #[tokio::test]
    async fn test_sync_and_async_mappers_invoke() {
        let double = MapperDescriptor::sync("double", ["n"], "twice", |args| {
            let n = args[0].downcast_ref::<i64>().copied().unwrap_or_default();
            Ok(Value::new(n * 2))
        });
        let out = double.invoke(vec![Value::new(21i64)]).await.unwrap();
        assert_eq!(out.downcast_ref::<i64>(), Some(&42));

        let failing = MapperDescriptor::new("fail", ["n"], "never", |_args: Vec<Value>| async {
            Err::<Value, _>(anyhow::anyhow!("boom"))
        });
        let err = failing.invoke(vec![Value::new(1i64)]).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_sync_mapper_panic_becomes_error() {
        let panicking = MapperDescriptor::sync("panics", ["n"], "never", |_| panic!("bad input"));
        let err = panicking.invoke(vec![Value::new(1i64)]).await.unwrap_err();
        assert!(err.to_string().contains("did not complete"));
    }

    struct Prefix(&'static str);

    impl MapperFn for Prefix {
        fn call(&self, inputs: Vec<Value>) -> MapperFuture {
            let text = inputs[0].downcast_ref::<String>().cloned().unwrap_or_default();
            let out = format!("{}{text}", self.0);
            Box::pin(async move { Ok(Value::new(out)) })
        }
    }

    #[tokio::test]
    async fn test_trait_object_mapper() {
        let desc = MapperDescriptor::with_fn("prefix", ["name"], "greeting", Prefix("hi "));
        let out = desc.invoke(vec![Value::new(String::from("ada"))]).await.unwrap();
        assert_eq!(out.downcast_ref::<String>().map(String::as_str), Some("hi ada"));
    }

    #[test]
    fn test_pure_flag_and_source() {
        let desc = noop("p", &["a"], "b").pure().with_source("guest-plugin");
        assert!(desc.is_pure());
        assert_eq!(desc.source(), Some("guest-plugin"));
    }
}
