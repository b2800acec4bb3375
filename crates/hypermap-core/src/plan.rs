//! Resolution plans: ordered mapper chains proven to reach a target.

use crate::error::{HypermapError, Result};
use crate::graph::Closure;
use crate::mapper::MapperId;
use crate::registry::SealedRegistry;
use crate::tag::TypeTag;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// One mapper invocation within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    /// Mapper to invoke.
    pub mapper: MapperId,

    /// Mapper name, kept for reporting.
    pub name: String,

    /// Input tags in the order values are passed.
    pub inputs: Vec<TypeTag>,

    /// Tag the step produces.
    pub output: TypeTag,

    /// Hop count of the output.
    pub cost: usize,
}

/// Ordered chain of mappers that produces a target from a set of base tags.
///
/// Every step's inputs are either base tags or outputs of earlier steps, and
/// no tag is produced twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionPlan {
    target: TypeTag,
    base: BTreeSet<TypeTag>,
    steps: Vec<PlanStep>,
}

impl ResolutionPlan {
    /// Target tag.
    pub fn target(&self) -> &TypeTag {
        &self.target
    }

    /// Caller-supplied tags the plan reads.
    pub fn base(&self) -> &BTreeSet<TypeTag> {
        &self.base
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` when the target was already available.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Hop count of the target.
    pub fn cost(&self) -> usize {
        self.steps.last().map_or(0, |s| s.cost)
    }

    /// Step names in execution order.
    pub fn mapper_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

impl fmt::Display for ResolutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "`{}` is already available", self.target);
        }
        for (i, step) in self.steps.iter().enumerate() {
            let inputs: Vec<&str> = step.inputs.iter().map(TypeTag::as_str).collect();
            writeln!(
                f,
                "{:>3}. {} ({}) -> {}",
                i + 1,
                step.name,
                inputs.join(", "),
                step.output
            )?;
        }
        Ok(())
    }
}

/// Computes the plan that produces `target` from `available` without
/// invoking anything.
///
/// # Errors
///
/// Returns `HypermapError::NoConversionPath` when the forward-chaining
/// fixpoint does not reach `target`.
#[tracing::instrument(level = "debug", skip_all, fields(target = %target))]
pub fn plan<'t, I>(registry: &SealedRegistry, available: I, target: &TypeTag) -> Result<ResolutionPlan>
where
    I: IntoIterator<Item = &'t TypeTag> + Clone,
{
    let closure = registry.graph().closure(available.clone(), Some(target.as_str()));

    if !closure.contains(target.as_str()) {
        let mut available: Vec<TypeTag> = available.into_iter().cloned().collect();
        available.sort();
        available.dedup();
        tracing::debug!(available = available.len(), "no conversion path");
        return Err(HypermapError::NoConversionPath {
            target: target.clone(),
            available,
        });
    }

    let mut builder = PlanBuilder {
        registry,
        closure: &closure,
        visited: HashSet::new(),
        base: BTreeSet::new(),
        steps: Vec::new(),
    };
    builder.visit(target)?;

    tracing::debug!(steps = builder.steps.len(), "planned resolution");
    Ok(ResolutionPlan {
        target: target.clone(),
        base: builder.base,
        steps: builder.steps,
    })
}

/// Walks provenance edges back from the target. Post-order emission puts
/// every producer before its consumers.
struct PlanBuilder<'a> {
    registry: &'a SealedRegistry,
    closure: &'a Closure,
    visited: HashSet<TypeTag>,
    base: BTreeSet<TypeTag>,
    steps: Vec<PlanStep>,
}

impl PlanBuilder<'_> {
    fn visit(&mut self, tag: &TypeTag) -> Result<()> {
        if !self.visited.insert(tag.clone()) {
            return Ok(());
        }

        let provenance = self.closure.provenance(tag.as_str()).ok_or_else(|| {
            HypermapError::Other(format!("tag `{tag}` missing from resolution closure"))
        })?;

        let Some(id) = provenance.via else {
            self.base.insert(tag.clone());
            return Ok(());
        };

        let mapper = self
            .registry
            .get(id)
            .ok_or_else(|| HypermapError::Other(format!("unknown mapper {id}")))?;

        for input in mapper.inputs() {
            self.visit(input)?;
        }

        self.steps.push(PlanStep {
            mapper: id,
            name: mapper.name().to_string(),
            inputs: mapper.inputs().to_vec(),
            output: mapper.output().clone(),
            cost: provenance.cost,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MapperDescriptor;
    use crate::registry::MapperRegistry;
    use crate::value::Value;
    use std::sync::Arc;

    fn sealed(edges: &[(&str, &[&str], &str)]) -> Arc<SealedRegistry> {
        let mut registry = MapperRegistry::new();
        for (name, inputs, output) in edges {
            registry
                .register(MapperDescriptor::sync(
                    *name,
                    inputs.iter().copied(),
                    *output,
                    |_| Ok(Value::new(())),
                ))
                .unwrap();
        }
        registry.seal()
    }

    fn tags(names: &[&str]) -> Vec<TypeTag> {
        names.iter().map(|n| TypeTag::from(*n)).collect()
    }

    #[test]
    fn test_plan_orders_producers_first() {
        let registry = sealed(&[
            ("b", &["normalized", "flag"], "final"),
            ("a", &["raw"], "normalized"),
        ]);
        let plan = plan(&registry, &tags(&["raw", "flag"]), &TypeTag::from("final")).unwrap();

        assert_eq!(plan.mapper_names(), vec!["a", "b"]);
        assert_eq!(plan.cost(), 2);
        assert_eq!(plan.base(), &tags(&["flag", "raw"]).into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_diamond_shares_common_step() {
        let registry = sealed(&[
            ("root", &["seed"], "common"),
            ("left", &["common"], "l"),
            ("right", &["common"], "r"),
            ("join", &["l", "r"], "out"),
        ]);
        let plan = plan(&registry, &tags(&["seed"]), &TypeTag::from("out")).unwrap();

        assert_eq!(plan.mapper_names(), vec!["root", "left", "right", "join"]);
        let outputs: HashSet<&TypeTag> = plan.steps().iter().map(|s| &s.output).collect();
        assert_eq!(outputs.len(), plan.len());
    }

    #[test]
    fn test_plan_only_includes_needed_steps() {
        let registry = sealed(&[
            ("noise", &["raw"], "unrelated"),
            ("a", &["raw"], "normalized"),
        ]);
        let plan = plan(&registry, &tags(&["raw"]), &TypeTag::from("normalized")).unwrap();
        assert_eq!(plan.mapper_names(), vec!["a"]);
    }

    #[test]
    fn test_target_available_gives_empty_plan() {
        let registry = sealed(&[("a", &["raw"], "normalized")]);
        let plan = plan(&registry, &tags(&["normalized"]), &TypeTag::from("normalized")).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.cost(), 0);
        assert_eq!(plan.to_string(), "`normalized` is already available");
    }

    #[test]
    fn test_no_path_reports_sorted_available() {
        let registry = sealed(&[("a", &["raw"], "normalized")]);
        let err = plan(&registry, &tags(&["zeta", "alpha"]), &TypeTag::from("normalized"))
            .unwrap_err();
        match err {
            HypermapError::NoConversionPath { target, available } => {
                assert_eq!(target.as_str(), "normalized");
                assert_eq!(available, tags(&["alpha", "zeta"]));
            }
            other => panic!("expected NoConversionPath, got {other:?}"),
        }
    }

    #[test]
    fn test_display_lists_steps() {
        let registry = sealed(&[
            ("a", &["raw"], "normalized"),
            ("b", &["normalized", "flag"], "final"),
        ]);
        let plan = plan(&registry, &tags(&["raw", "flag"]), &TypeTag::from("final")).unwrap();
        let text = plan.to_string();
        assert!(text.contains("1. a (raw) -> normalized"));
        assert!(text.contains("2. b (normalized, flag) -> final"));
    }
}
