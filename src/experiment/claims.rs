//! Cross-experiment target claims
//!
//! Two experiments never inject into the same pod at the same time. A
//! target is claimed by the experiment that selected it and released when
//! that experiment's run finishes or fails.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cluster::TargetId;
use crate::experiment::target::Target;

/// Shared map of target to the experiment holding it
#[derive(Debug, Clone, Default)]
pub struct TargetClaims {
    holders: Arc<DashMap<TargetId, String>>,
}

impl TargetClaims {
    /// Empty claim set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Experiment currently holding `id`
    #[must_use]
    pub fn holder(&self, id: &TargetId) -> Option<String> {
        self.holders.get(id).map(|entry| entry.value().clone())
    }

    /// Drop targets that another experiment holds
    #[must_use]
    pub fn exclude_foreign(&self, experiment: &str, targets: Vec<Target>) -> Vec<Target> {
        targets
            .into_iter()
            .filter(|t| !matches!(self.holder(&t.id), Some(holder) if holder != experiment))
            .collect()
    }

    /// Claim `id` for `experiment`. False if another experiment got it first.
    pub fn claim(&self, experiment: &str, id: &TargetId) -> bool {
        match self.holders.entry(id.clone()) {
            Entry::Occupied(held) => held.get() == experiment,
            Entry::Vacant(free) => {
                free.insert(experiment.to_string());
                true
            }
        }
    }

    /// Claim every target, keeping only the ones won
    #[must_use]
    pub fn claim_all(&self, experiment: &str, targets: Vec<Target>) -> Vec<Target> {
        targets
            .into_iter()
            .filter(|t| self.claim(experiment, &t.id))
            .collect()
    }

    /// Release everything `experiment` holds
    pub fn release_all(&self, experiment: &str) {
        self.holders.retain(|_, holder| holder != experiment);
    }

    /// Number of claimed targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Whether nothing is claimed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}
