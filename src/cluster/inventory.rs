//! Pod inventories
//!
//! Parses the subset of `kubectl get pods -o json` output the selector needs,
//! and serves a fixed pod list loaded from such a file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{ClusterObserver, Pod};
use crate::experiment::selector::SelectorSpec;

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<KubePod>,
}

#[derive(Deserialize)]
struct KubePod {
    metadata: KubeMetadata,
    #[serde(default)]
    spec: KubePodSpec,
    #[serde(default)]
    status: KubePodStatus,
}

#[derive(Deserialize)]
struct KubeMetadata {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct KubePodSpec {
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<KubeContainer>,
}

#[derive(Deserialize)]
struct KubeContainer {
    name: String,
}

#[derive(Deserialize, Default)]
struct KubePodStatus {
    #[serde(default = "default_phase")]
    phase: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_phase() -> String {
    "Unknown".to_string()
}

impl From<KubePod> for Pod {
    fn from(pod: KubePod) -> Self {
        Self {
            namespace: pod.metadata.namespace,
            name: pod.metadata.name,
            labels: pod.metadata.labels,
            annotations: pod.metadata.annotations,
            node_name: pod.spec.node_name,
            phase: pod.status.phase,
            containers: pod.spec.containers.into_iter().map(|c| c.name).collect(),
        }
    }
}

/// Parse a Kubernetes `PodList` JSON document into pods.
pub fn parse_pod_list(json: &str) -> Result<Vec<Pod>> {
    let list: PodList = serde_json::from_str(json).context("Failed to parse pod list JSON")?;
    Ok(list.items.into_iter().map(Pod::from).collect())
}

/// A fixed set of pods, typically loaded from a saved `kubectl get pods -o json`
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    pods: Vec<Pod>,
}

impl StaticInventory {
    /// Wrap an in-memory pod list
    #[must_use]
    pub const fn new(pods: Vec<Pod>) -> Self {
        Self { pods }
    }

    /// Load an inventory from a `PodList` JSON file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory file: {}", path.display()))?;
        let pods = parse_pod_list(&content)
            .with_context(|| format!("in inventory file {}", path.display()))?;
        Ok(Self::new(pods))
    }

    /// All pods in the inventory
    #[must_use]
    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }
}

#[async_trait]
impl ClusterObserver for StaticInventory {
    async fn list_candidates(&self, _selector: &SelectorSpec) -> Result<Vec<Pod>> {
        Ok(self.pods.clone())
    }
}
