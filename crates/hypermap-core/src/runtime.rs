//! Boundary runtime serving resolution requests.
//!
//! This module provides [`ServeRuntime`], the piece the serve boundary talks
//! to. It owns the sealed registry and configuration, applies the per-call
//! deadline, and turns resolver errors into the statuses reported to the
//! remote caller.

use crate::config::ResolverConfig;
use crate::error::{HypermapError, Result};
use crate::registry::{MapperRegistry, SealedRegistry};
use crate::resolver::{Interrupt, Resolution, Resolver};
use crate::tag::TypeTag;
use crate::value::{AvailableSet, Value};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A resolution request arriving over the boundary.
#[derive(Debug, Clone)]
pub struct BoundaryRequest {
    /// Values the caller already holds.
    pub available: AvailableSet,

    /// Tag the caller needs.
    pub target: TypeTag,

    /// Fires when the caller gives up.
    pub cancel: Option<CancellationToken>,
}

impl BoundaryRequest {
    /// Creates a request without a cancellation token.
    pub fn new(available: AvailableSet, target: impl Into<TypeTag>) -> Self {
        Self {
            available,
            target: target.into(),
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Status reported to the caller when a request cannot be satisfied.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryStatus {
    /// No chain of mappers reaches the target.
    UnsupportedConversion,

    /// A chain existed but one of its mappers failed.
    ExecutionFailed,

    /// The caller cancelled the request.
    Cancelled,

    /// The per-call deadline elapsed.
    DeadlineExceeded,

    /// Anything else.
    Internal,
}

impl BoundaryStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryStatus::UnsupportedConversion => "unsupported_conversion",
            BoundaryStatus::ExecutionFailed => "execution_failed",
            BoundaryStatus::Cancelled => "cancelled",
            BoundaryStatus::DeadlineExceeded => "deadline_exceeded",
            BoundaryStatus::Internal => "internal",
        }
    }
}

impl fmt::Display for BoundaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure returned across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{status}: {message}")]
pub struct BoundaryFailure {
    /// Failure class.
    pub status: BoundaryStatus,

    /// Human-readable description.
    pub message: String,

    /// Failing mapper, for execution failures.
    pub mapper: Option<String>,

    /// Plan steps completed before the call stopped.
    pub executed: Vec<String>,
}

impl From<&HypermapError> for BoundaryFailure {
    fn from(err: &HypermapError) -> Self {
        let status = match err {
            HypermapError::NoConversionPath { .. } => BoundaryStatus::UnsupportedConversion,
            HypermapError::MapperExecution { .. } => BoundaryStatus::ExecutionFailed,
            HypermapError::Cancelled { .. } => BoundaryStatus::Cancelled,
            HypermapError::Timeout { .. } => BoundaryStatus::DeadlineExceeded,
            _ => BoundaryStatus::Internal,
        };

        let message = match err {
            HypermapError::MapperExecution { source, .. } => format!("{err}: {source}"),
            _ => err.to_string(),
        };

        Self {
            status,
            message,
            mapper: err.failed_mapper().map(str::to_string),
            executed: err.executed_steps().to_vec(),
        }
    }
}

/// Result of one boundary call.
pub type BoundaryResponse = std::result::Result<Value, BoundaryFailure>;

/// Boundary contract for serving resolution requests.
///
/// Kept object safe so transports can hold a `dyn Boundary`.
pub trait Boundary: Send + Sync {
    /// Serves one request.
    fn call(&self, request: BoundaryRequest) -> BoxFuture<'_, BoundaryResponse>;
}

/// Runtime behind the serve boundary.
///
/// One instance is built at startup, after every plugin has registered, and
/// shared by all concurrent calls.
///
/// # Examples
///
/// ```
/// use hypermap_core::{
///     AvailableSet, BoundaryRequest, BoundaryStatus, MapperDescriptor, MapperRegistry,
///     ResolverConfig, ServeRuntime, Value,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> hypermap_core::Result<()> {
/// let mut registry = MapperRegistry::new();
/// registry.register(MapperDescriptor::sync("a", ["raw"], "normalized", |args| Ok(args[0].clone())))?;
/// let runtime = ServeRuntime::from_registry(registry, ResolverConfig::default())?;
///
/// let failure = runtime
///     .handle(BoundaryRequest::new(AvailableSet::new(), "normalized"))
///     .await
///     .unwrap_err();
/// assert_eq!(failure.status, BoundaryStatus::UnsupportedConversion);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServeRuntime {
    config: ResolverConfig,
    resolver: Resolver,
}

impl ServeRuntime {
    /// Creates a runtime over an already sealed registry.
    ///
    /// # Errors
    ///
    /// Returns `HypermapError::InvalidConfig` if `config` is inconsistent or
    /// names a duplicate policy other than the one the registry was built
    /// with. Build the registry with [`ResolverConfig::registry`] to keep the
    /// two aligned.
    pub fn new(registry: Arc<SealedRegistry>, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        if registry.policy() != config.duplicate_policy {
            return Err(HypermapError::InvalidConfig(format!(
                "duplicate_policy is {:?} but the registry was built with {:?}",
                config.duplicate_policy,
                registry.policy()
            )));
        }
        let resolver = Resolver::from_config(registry, &config);
        Ok(Self { config, resolver })
    }

    /// Seals `registry` and creates a runtime over it.
    ///
    /// # Errors
    ///
    /// Same as [`ServeRuntime::new`].
    pub fn from_registry(mut registry: MapperRegistry, config: ResolverConfig) -> Result<Self> {
        let sealed = registry.seal();
        Self::new(sealed, config)
    }

    /// Active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Underlying resolver.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Resolves a request, keeping the full error.
    ///
    /// Applies the configured deadline and the request's cancellation token.
    /// Either one drops the in-flight mapper future.
    ///
    /// # Errors
    ///
    /// Returns every error [`Resolver::resolve`] can, plus
    /// `HypermapError::Cancelled` and `HypermapError::Timeout`.
    #[tracing::instrument(skip_all, fields(target = %request.target))]
    pub async fn resolve(&self, request: BoundaryRequest) -> Result<Resolution> {
        let BoundaryRequest {
            available,
            target,
            cancel,
        } = request;
        let mut interrupt = match cancel {
            Some(token) => Interrupt::cancel(token),
            None => Interrupt::default(),
        };
        if let Some(after) = self.config.call_timeout() {
            interrupt = interrupt.with_timeout(after);
        }

        self.resolver
            .resolve_interruptible(available, &target, &interrupt)
            .await
    }

    /// Serves a request, reducing errors to a [`BoundaryFailure`].
    pub async fn handle(&self, request: BoundaryRequest) -> BoundaryResponse {
        match self.resolve(request).await {
            Ok(resolution) => Ok(resolution.into_value()),
            Err(err) => {
                let failure = BoundaryFailure::from(&err);
                tracing::info!(status = %failure.status, error = %err, "boundary call failed");
                Err(failure)
            }
        }
    }
}

impl Boundary for ServeRuntime {
    fn call(&self, request: BoundaryRequest) -> BoxFuture<'_, BoundaryResponse> {
        Box::pin(self.handle(request))
    }
}
