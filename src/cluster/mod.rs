//! Cluster state
//!
//! The engine does not discover or watch pods itself. A [`ClusterObserver`]
//! supplies the candidate set and the engine only ever reads it.

pub mod inventory;
pub mod kubectl;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::experiment::selector::SelectorSpec;

pub use inventory::{parse_pod_list, StaticInventory};
pub use kubectl::KubectlObserver;

/// Identity of a workload instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    /// Namespace the pod lives in
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl TargetId {
    /// Build an identity from namespace and name
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Observed state of one pod, as much as selection needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Node the pod is scheduled on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Pod phase (`Pending`, `Running`, `Succeeded`, `Failed`, `Unknown`)
    pub phase: String,
    /// Container names, in spec order
    #[serde(default)]
    pub containers: Vec<String>,
}

impl Pod {
    /// Identity of this pod
    #[must_use]
    pub fn id(&self) -> TargetId {
        TargetId::new(&self.namespace, &self.name)
    }
}

/// Supplies the current candidate instances for a selector.
///
/// Implementations may use the selector to narrow what they fetch (e.g. by
/// namespace) but are not required to; the selector evaluator applies the
/// full predicate afterwards.
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    /// List candidate pods for the selector
    async fn list_candidates(&self, selector: &SelectorSpec) -> Result<Vec<Pod>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_display() {
        assert_eq!(TargetId::new("default", "web-1").to_string(), "default/web-1");
    }

    #[test]
    fn test_target_id_orders_by_namespace_then_name() {
        let mut ids = vec![
            TargetId::new("b", "a"),
            TargetId::new("a", "z"),
            TargetId::new("a", "b"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                TargetId::new("a", "b"),
                TargetId::new("a", "z"),
                TargetId::new("b", "a"),
            ]
        );
    }

    #[test]
    fn test_pod_id() {
        let pod = Pod {
            namespace: "shop".to_string(),
            name: "cart-0".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            node_name: None,
            phase: "Running".to_string(),
            containers: vec![],
        };
        assert_eq!(pod.id(), TargetId::new("shop", "cart-0"));
    }
}
