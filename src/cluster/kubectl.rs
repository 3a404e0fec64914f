//! `kubectl get pods` observer

use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::inventory::parse_pod_list;
use super::{ClusterObserver, Pod};
use crate::exec::process::run_command;
use crate::experiment::selector::SelectorSpec;

/// Lists pods by shelling out to `kubectl get pods -o json`
#[derive(Debug, Clone)]
pub struct KubectlObserver {
    kubectl: String,
}

impl KubectlObserver {
    /// Create an observer that invokes the given kubectl binary
    #[must_use]
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    /// Build the list invocations for a selector: one per namespace, or a
    /// single cluster-wide call when the selector names no namespaces.
    #[must_use]
    pub fn build_commands(&self, selector: &SelectorSpec) -> Vec<Command> {
        let base = |scope: &[&str]| {
            let mut cmd = Command::new(&self.kubectl);
            cmd.arg("get").arg("pods").args(scope).arg("-o").arg("json");
            cmd
        };

        if selector.namespaces.is_empty() {
            vec![base(&["--all-namespaces"])]
        } else {
            selector
                .namespaces
                .iter()
                .map(|ns| base(&["-n", ns.as_str()]))
                .collect()
        }
    }
}

impl Default for KubectlObserver {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl ClusterObserver for KubectlObserver {
    async fn list_candidates(&self, selector: &SelectorSpec) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();
        for cmd in self.build_commands(selector) {
            let output = run_command(cmd).await.context("Failed to run kubectl")?;
            if !output.success() {
                bail!("kubectl get pods failed: {}", output.stderr.trim());
            }
            pods.extend(parse_pod_list(&output.stdout)?);
        }
        debug!(count = pods.len(), "listed candidate pods");
        Ok(pods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_build_commands_all_namespaces() {
        let observer = KubectlObserver::default();
        let cmds = observer.build_commands(&SelectorSpec::default());
        assert_eq!(cmds.len(), 1);
        assert_eq!(
            args_of(&cmds[0]),
            vec!["get", "pods", "--all-namespaces", "-o", "json"]
        );
    }

    #[test]
    fn test_build_commands_per_namespace() {
        let observer = KubectlObserver::new("k");
        let selector = SelectorSpec {
            namespaces: vec!["shop".to_string(), "pay".to_string()],
            ..SelectorSpec::default()
        };
        let cmds = observer.build_commands(&selector);
        assert_eq!(cmds.len(), 2);
        assert_eq!(args_of(&cmds[0]), vec!["get", "pods", "-n", "shop", "-o", "json"]);
        assert_eq!(args_of(&cmds[1]), vec!["get", "pods", "-n", "pay", "-o", "json"]);
        assert_eq!(cmds[1].get_program(), "k");
    }
}
