//! Resolver: plans and executes mapper chains.
//!
//! A resolution runs in two phases. Planning forward-chains over the sealed
//! registry without touching any mapper, so a missing path fails before any
//! side effect. Execution then runs the plan in order against the request's
//! private available set, inserting each output as it is produced.
//!
//! A failing mapper ends the resolution. No alternative path is tried,
//! because the failed mapper may already have had side effects.

use crate::cache::{CacheKey, PureCache};
use crate::config::ResolverConfig;
use crate::error::{HypermapError, Result};
use crate::plan::{self, ResolutionPlan};
use crate::registry::SealedRegistry;
use crate::tag::TypeTag;
use crate::value::{AvailableSet, Value};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    value: Value,
    plan: ResolutionPlan,
    available: AvailableSet,
    invocations: usize,
    cache_hits: usize,
}

impl Resolution {
    /// The target value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the resolution, returning the target value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Borrows the target value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Plan that was executed.
    pub fn plan(&self) -> &ResolutionPlan {
        &self.plan
    }

    /// Available set at the end of the call: caller values plus every
    /// intermediate output.
    pub fn available(&self) -> &AvailableSet {
        &self.available
    }

    /// Number of mapper functions actually invoked.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Number of steps served from the cross-call cache.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }
}

/// Resolves target tags against a sealed registry.
///
/// Cheap to share: clone the `Arc` or wrap the resolver itself in one.
/// Each call works on its own available set, so concurrent calls never
/// contend except on the optional cross-call cache.
///
/// # Examples
///
/// ```
/// use hypermap_core::{AvailableSet, MapperDescriptor, MapperRegistry, Resolver, TypeTag, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> hypermap_core::Result<()> {
/// let mut registry = MapperRegistry::new();
/// registry.register(MapperDescriptor::sync("parse", ["text"], "number", |args| {
///     let text = args[0].downcast_ref::<String>().cloned().unwrap_or_default();
///     Ok(Value::new(text.trim().parse::<i64>()?))
/// }))?;
///
/// let resolver = Resolver::new(registry.seal());
/// let available = AvailableSet::new().with("text", Value::new(String::from(" 42 ")));
/// let resolution = resolver.resolve(available, &TypeTag::from("number")).await?;
/// assert_eq!(resolution.downcast_ref::<i64>(), Some(&42));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<SealedRegistry>,
    cache: Option<Arc<PureCache>>,
}

impl Resolver {
    /// Creates a resolver without cross-call caching.
    pub fn new(registry: Arc<SealedRegistry>) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    /// Creates a resolver honoring the cache settings in `config`.
    pub fn from_config(registry: Arc<SealedRegistry>, config: &ResolverConfig) -> Self {
        let resolver = Self::new(registry);
        if config.cross_call_cache {
            resolver.with_cross_call_cache(config.cache_capacity)
        } else {
            resolver
        }
    }

    /// Enables the cross-call cache for pure mappers.
    #[must_use]
    pub fn with_cross_call_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(Arc::new(PureCache::new(capacity)));
        self
    }

    /// Registry this resolver reads.
    pub fn registry(&self) -> &Arc<SealedRegistry> {
        &self.registry
    }

    /// Cross-call cache, when enabled.
    pub fn cache(&self) -> Option<&PureCache> {
        self.cache.as_deref()
    }

    /// Plans how `target` would be produced from `available` without invoking
    /// any mapper.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::NoConversionPath` when no chain exists.
    pub fn plan(&self, available: &AvailableSet, target: &TypeTag) -> Result<ResolutionPlan> {
        plan::plan(&self.registry, available.tags(), target)
    }

    /// Plans from bare tags, for callers that have no values yet.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::NoConversionPath` when no chain exists.
    pub fn plan_for_tags(&self, available: &[TypeTag], target: &TypeTag) -> Result<ResolutionPlan> {
        plan::plan(&self.registry, available, target)
    }

    /// Produces `target` from `available`.
    ///
    /// Returns immediately with no invocation when `target` is already
    /// available. Dropping the returned future drops any in-flight mapper.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `HypermapError::NoConversionPath` if no chain reaches `target`; no
    ///   mapper is invoked
    /// - `HypermapError::MapperExecution` if a mapper in the plan fails
    #[tracing::instrument(skip_all, fields(target = %target, available = available.len()))]
    pub async fn resolve(&self, available: AvailableSet, target: &TypeTag) -> Result<Resolution> {
        let plan = self.plan(&available, target)?;
        self.run(plan, available, &Interrupt::default()).await
    }

    /// Like [`Resolver::resolve`], but gives up as soon as `cancel` fires.
    ///
    /// The token is checked before every step and raced against the running
    /// mapper, so a chain stops at the step that was in flight.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::Cancelled` on cancellation, otherwise the same
    /// errors as [`Resolver::resolve`].
    #[tracing::instrument(skip_all, fields(target = %target, available = available.len()))]
    pub async fn resolve_with_cancel(
        &self,
        available: AvailableSet,
        target: &TypeTag,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let plan = self.plan(&available, target)?;
        self.run(plan, available, &Interrupt::cancel(cancel.clone()))
            .await
    }

    /// Resolves under an optional cancellation token and deadline.
    pub(crate) async fn resolve_interruptible(
        &self,
        available: AvailableSet,
        target: &TypeTag,
        interrupt: &Interrupt,
    ) -> Result<Resolution> {
        let plan = self.plan(&available, target)?;
        self.run(plan, available, interrupt).await
    }

    /// Resolves and downcasts the target value to `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Resolver::resolve`], plus `HypermapError::Other` if the
    /// produced value is not a `T`.
    pub async fn resolve_as<T: Any + Send + Sync>(
        &self,
        available: AvailableSet,
        target: &TypeTag,
    ) -> Result<Arc<T>> {
        let resolution = self.resolve(available, target).await?;
        let value = resolution.into_value();
        value.downcast::<T>().ok_or_else(|| {
            HypermapError::Other(format!(
                "`{target}` resolved to {}, expected {}",
                value.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    /// Executes a previously computed plan against `available`.
    ///
    /// Replaying the plan of an earlier resolution against the same starting
    /// values produces the same output.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::MapperExecution` if a mapper fails, or
    /// `HypermapError::Other` if the plan does not fit `available`.
    pub async fn execute(&self, plan: ResolutionPlan, available: AvailableSet) -> Result<Resolution> {
        self.run(plan, available, &Interrupt::default()).await
    }

    /// Executes a plan, stopping between or during steps once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Same as [`Resolver::execute`], plus `HypermapError::Cancelled`.
    pub async fn execute_with_cancel(
        &self,
        plan: ResolutionPlan,
        available: AvailableSet,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        self.run(plan, available, &Interrupt::cancel(cancel.clone()))
            .await
    }

    async fn run(
        &self,
        plan: ResolutionPlan,
        mut available: AvailableSet,
        interrupt: &Interrupt,
    ) -> Result<Resolution> {
        let mut invocations = 0;
        let mut cache_hits = 0;
        let mut executed: Vec<String> = Vec::with_capacity(plan.len());

        for step in plan.steps() {
            if available.contains(step.output.as_str()) {
                tracing::debug!(step = %step.name, output = %step.output, "output already available");
                continue;
            }

            interrupt.check(plan.target(), &executed)?;

            let mapper = self
                .registry
                .get(step.mapper)
                .ok_or_else(|| HypermapError::Other(format!("unknown mapper {}", step.mapper)))?;

            let inputs = step
                .inputs
                .iter()
                .map(|tag| {
                    available.get(tag.as_str()).cloned().ok_or_else(|| {
                        HypermapError::Other(format!(
                            "input `{tag}` of `{}` is not available",
                            step.name
                        ))
                    })
                })
                .collect::<Result<Vec<Value>>>()?;

            let key = self
                .cache
                .as_ref()
                .and_then(|_| CacheKey::for_invocation(mapper, &inputs));

            let cached = match (&self.cache, &key) {
                (Some(cache), Some(key)) => cache.get(key),
                _ => None,
            };

            let output = match cached {
                Some(value) => {
                    tracing::debug!(step = %step.name, output = %step.output, "cross-call cache hit");
                    cache_hits += 1;
                    value
                }
                None => {
                    tracing::debug!(step = %step.name, output = %step.output, "invoking mapper");
                    invocations += 1;
                    let result = interrupt
                        .race(mapper.invoke(inputs), plan.target(), &executed)
                        .await?;
                    let value = result.map_err(|source| {
                        tracing::warn!(mapper = %step.name, error = %source, "mapper failed");
                        HypermapError::MapperExecution {
                            mapper: step.name.clone(),
                            executed: executed.clone(),
                            source: source.into(),
                        }
                    })?;
                    if let (Some(cache), Some(key)) = (&self.cache, key) {
                        cache.insert(key, value.clone());
                    }
                    value
                }
            };

            available.insert(step.output.clone(), output);
            executed.push(step.name.clone());
        }

        let value = available.get(plan.target().as_str()).cloned().ok_or_else(|| {
            HypermapError::Other(format!("plan did not produce `{}`", plan.target()))
        })?;

        tracing::debug!(steps = plan.len(), invocations, cache_hits, "resolution complete");
        Ok(Resolution {
            value,
            plan,
            available,
            invocations,
            cache_hits,
        })
    }
}

/// Reasons a running resolution may be cut short.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interrupt {
    cancel: Option<CancellationToken>,
    deadline: Option<(Instant, Duration)>,
}

impl Interrupt {
    pub(crate) fn cancel(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            deadline: None,
        }
    }

    /// Adds a deadline `after` from now.
    pub(crate) fn with_timeout(mut self, after: Duration) -> Self {
        self.deadline = Some((Instant::now() + after, after));
        self
    }

    fn cancelled_error(target: &TypeTag, executed: &[String]) -> HypermapError {
        tracing::info!(target = %target, completed = executed.len(), "resolution cancelled by caller");
        HypermapError::Cancelled {
            target: target.clone(),
            executed: executed.to_vec(),
        }
    }

    fn timeout_error(after: Duration, target: &TypeTag, executed: &[String]) -> HypermapError {
        let millis = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(target = %target, millis, completed = executed.len(), "resolution deadline exceeded");
        HypermapError::Timeout {
            target: target.clone(),
            millis,
            executed: executed.to_vec(),
        }
    }

    /// Fails if the caller has already given up.
    fn check(&self, target: &TypeTag, executed: &[String]) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(Self::cancelled_error(target, executed));
        }
        match self.deadline {
            Some((at, after)) if Instant::now() >= at => {
                Err(Self::timeout_error(after, target, executed))
            }
            _ => Ok(()),
        }
    }

    /// Drives `work` until it finishes or the caller gives up, dropping it
    /// in the latter case.
    async fn race<T>(
        &self,
        work: impl Future<Output = T>,
        target: &TypeTag,
        executed: &[String],
    ) -> Result<T> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Self::cancelled_error(target, executed)),
            _ = expired => {
                let after = self.deadline.map_or(Duration::ZERO, |(_, after)| after);
                Err(Self::timeout_error(after, target, executed))
            }
            output = work => Ok(output),
        }
    }
}
