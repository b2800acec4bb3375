//! Error types for hypermap operations.
//!
//! This module defines every failure that can occur between plugin
//! registration and the end of a resolution call. All errors use `thiserror`
//! so callers can match on the precise failure and still get readable
//! messages.

use crate::tag::TypeTag;
use std::path::PathBuf;
use thiserror::Error;

/// Comprehensive error type for hypermap operations.
///
/// Registration-time variants come first, then the resolution failures the
/// boundary layer reports to callers, then configuration and IO plumbing.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HypermapError {
    // Registration errors
    /// A mapper with the same input set and output is already registered and
    /// the active duplicate policy rejects it.
    #[error("duplicate mapper `{name}`: {} -> {output} is already registered", display_tags(.inputs))]
    DuplicateMapper {
        /// Name of the rejected descriptor.
        name: String,
        /// Declared inputs of the rejected descriptor.
        inputs: Vec<TypeTag>,
        /// Declared output of the rejected descriptor.
        output: TypeTag,
    },

    /// Another registered mapper already uses this name.
    #[error("mapper name `{0}` is already registered")]
    DuplicateMapperName(String),

    /// Registration was attempted after the registry was sealed.
    #[error("registry is sealed; cannot register mapper `{0}`")]
    SealedRegistryMutation(String),

    /// The descriptor violates a structural rule (empty inputs, repeated
    /// inputs, or an output that is also an input).
    #[error("invalid mapper `{name}`: {reason}")]
    InvalidMapper {
        /// Name of the offending descriptor.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    // Resolution errors
    /// No chain of registered mappers reaches the target from the available tags.
    #[error("unsupported conversion: no path to `{target}` from {}", display_tags(.available))]
    NoConversionPath {
        /// Requested type tag.
        target: TypeTag,
        /// Tags the caller supplied, sorted.
        available: Vec<TypeTag>,
    },

    /// A selected mapper failed mid-chain.
    #[error("mapper `{mapper}` failed after {} completed step(s)", .executed.len())]
    MapperExecution {
        /// Name of the failing mapper.
        mapper: String,
        /// Names of the plan steps that completed before the failure.
        executed: Vec<String>,
        /// Underlying cause returned by the mapper.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The caller gave up on the resolution.
    #[error("resolution of `{target}` was cancelled after {} completed step(s)", .executed.len())]
    Cancelled {
        /// Requested type tag.
        target: TypeTag,
        /// Names of the plan steps that completed before cancellation.
        executed: Vec<String>,
    },

    /// The resolution exceeded its deadline.
    #[error("resolution of `{target}` timed out after {millis}ms ({} completed step(s))", .executed.len())]
    Timeout {
        /// Requested type tag.
        target: TypeTag,
        /// Deadline that elapsed, in milliseconds.
        millis: u64,
        /// Names of the plan steps that completed before the deadline.
        executed: Vec<String>,
    },

    // Config errors
    /// Invalid configuration detected.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Error parsing configuration file.
    #[error("config parse error: {0}")]
    ConfigParseError(String),

    /// Configuration file not found at the expected location.
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Mapper manifest could not be turned into descriptors.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    // IO and system errors
    /// Standard IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context from anyhow.
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    /// Unexpected error occurred.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl HypermapError {
    /// Returns `true` when the failure means "no path exists", as opposed to
    /// "a path existed but running it failed".
    pub fn is_unsupported_conversion(&self) -> bool {
        matches!(self, HypermapError::NoConversionPath { .. })
    }

    /// Plan steps that completed before the resolution stopped early.
    pub fn executed_steps(&self) -> &[String] {
        match self {
            HypermapError::MapperExecution { executed, .. }
            | HypermapError::Cancelled { executed, .. }
            | HypermapError::Timeout { executed, .. } => executed,
            _ => &[],
        }
    }

    /// Name of the mapper that failed, if this is an execution failure.
    pub fn failed_mapper(&self) -> Option<&str> {
        match self {
            HypermapError::MapperExecution { mapper, .. } => Some(mapper),
            _ => None,
        }
    }
}

fn display_tags(tags: &[TypeTag]) -> String {
    let names: Vec<&str> = tags.iter().map(TypeTag::as_str).collect();
    format!("{{{}}}", names.join(", "))
}

/// Result type alias for hypermap operations.
///
/// All fallible hypermap operations return this type, using [`HypermapError`]
/// for error variants.
pub type Result<T> = std::result::Result<T, HypermapError>;
