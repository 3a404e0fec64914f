//! Selector evaluation
//!
//! Filters the observed pod set down to the pods an experiment may target.
//! Predicate groups combine with AND; list-valued groups match if any entry
//! matches. Evaluation is pure and an empty result is not an error.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::Pod;
use crate::experiment::target::Target;

/// Phase selected when the selector does not name any
pub const DEFAULT_PHASE: &str = "Running";

/// Field selector keys understood by [`evaluate`]
pub const FIELD_KEYS: &[&str] = &[
    "metadata.name",
    "metadata.namespace",
    "spec.nodeName",
    "status.phase",
];

/// Operator of a set-based label expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionOperator {
    /// Label value is one of `values`
    In,
    /// Label is absent or its value is none of `values`
    NotIn,
    /// Label key is present
    Exists,
    /// Label key is absent
    DoesNotExist,
}

/// Set-based label requirement, as in Kubernetes `matchExpressions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelExpression {
    /// Label key
    pub key: String,
    /// How the key relates to `values`
    pub operator: ExpressionOperator,
    /// Values for `In`/`NotIn`
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelExpression {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            ExpressionOperator::In => value.is_some_and(|v| self.values.contains(v)),
            ExpressionOperator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            ExpressionOperator::Exists => value.is_some(),
            ExpressionOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Declarative pod selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSpec {
    /// Namespaces to select from (any when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Nodes the pods must run on (any when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    /// Explicit pods, namespace to names (any when empty)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pods: BTreeMap<String, Vec<String>>,
    /// Labels that must all be present with these values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selectors: BTreeMap<String, String>,
    /// Set-based label requirements, all must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression_selectors: Vec<LabelExpression>,
    /// Annotations that must all be present with these values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotation_selectors: BTreeMap<String, String>,
    /// Field equality requirements, keyed by [`FIELD_KEYS`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_selectors: BTreeMap<String, String>,
    /// Accepted pod phases (only `Running` when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_phase_selectors: Vec<String>,
}

impl SelectorSpec {
    /// Check the selector is well-formed
    pub fn validate(&self) -> Result<()> {
        for key in self.field_selectors.keys() {
            if !FIELD_KEYS.contains(&key.as_str()) {
                bail!(
                    "Unsupported field selector '{key}' (supported: {})",
                    FIELD_KEYS.join(", ")
                );
            }
        }

        for expr in &self.expression_selectors {
            if expr.key.trim().is_empty() {
                bail!("Expression selector key cannot be empty");
            }
            match expr.operator {
                ExpressionOperator::In | ExpressionOperator::NotIn if expr.values.is_empty() => {
                    bail!(
                        "Expression selector on '{}' with {:?} requires values",
                        expr.key,
                        expr.operator
                    );
                }
                ExpressionOperator::Exists | ExpressionOperator::DoesNotExist
                    if !expr.values.is_empty() =>
                {
                    bail!(
                        "Expression selector on '{}' with {:?} must not have values",
                        expr.key,
                        expr.operator
                    );
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Whether a single pod satisfies every predicate group
    #[must_use]
    pub fn matches(&self, pod: &Pod) -> bool {
        any_or_empty(&self.namespaces, &pod.namespace)
            && (self.nodes.is_empty()
                || pod
                    .node_name
                    .as_ref()
                    .is_some_and(|n| self.nodes.contains(n)))
            && (self.pods.is_empty()
                || self
                    .pods
                    .get(&pod.namespace)
                    .is_some_and(|names| names.contains(&pod.name)))
            && all_match(&self.label_selectors, &pod.labels)
            && self
                .expression_selectors
                .iter()
                .all(|e| e.matches(&pod.labels))
            && all_match(&self.annotation_selectors, &pod.annotations)
            && self
                .field_selectors
                .iter()
                .all(|(key, want)| field_value(pod, key) == Some(want.as_str()))
            && self.phase_matches(&pod.phase)
    }

    fn phase_matches(&self, phase: &str) -> bool {
        if self.pod_phase_selectors.is_empty() {
            phase == DEFAULT_PHASE
        } else {
            self.pod_phase_selectors.iter().any(|p| p == phase)
        }
    }
}

fn any_or_empty(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == value)
}

fn all_match(wanted: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| actual.get(k) == Some(v))
}

fn field_value<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    match key {
        "metadata.name" => Some(&pod.name),
        "metadata.namespace" => Some(&pod.namespace),
        "spec.nodeName" => pod.node_name.as_deref(),
        "status.phase" => Some(&pod.phase),
        _ => None,
    }
}

/// Filter candidates down to the pods matching the selector.
#[must_use]
pub fn evaluate(candidates: &[Pod], selector: &SelectorSpec) -> Vec<Pod> {
    candidates
        .iter()
        .filter(|pod| selector.matches(pod))
        .cloned()
        .collect()
}

/// Turn matching pods into targets scoped to the requested containers.
///
/// With no `container_names` every container of the pod is in scope. With
/// names, the scope is the intersection and pods that have none of the
/// requested containers are dropped. Pods that report no containers are
/// taken at their word: the scope is `container_names` as given, or empty
/// (the exec default container) when no names were requested.
#[must_use]
pub fn scope_targets(pods: &[Pod], container_names: &[String]) -> Vec<Target> {
    pods.iter()
        .filter_map(|pod| {
            if pod.containers.is_empty() {
                return Some(Target::new(pod.id(), container_names.to_vec()));
            }
            if container_names.is_empty() {
                return Some(Target::new(pod.id(), pod.containers.clone()));
            }
            let scope: Vec<String> = pod
                .containers
                .iter()
                .filter(|c| container_names.contains(c))
                .cloned()
                .collect();
            (!scope.is_empty()).then(|| Target::new(pod.id(), scope))
        })
        .collect()
}
