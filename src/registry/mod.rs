// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-memory catalog of attack techniques
//!
//! Built once in `main` and handed to every consumer by reference. IDs are
//! expected to be unique; the registry does not enforce it.

use crate::technique::Technique;
use crate::types::{Platform, Tactic};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TechniqueFilter {
    pub platform: Option<Platform>,
    pub tactic: Option<Tactic>,
}

impl TechniqueFilter {
    pub fn matches(&self, technique: &Technique) -> bool {
        let platform_matches = self
            .platform
            .map(|platform| technique.platform == platform)
            .unwrap_or(true);
        let tactic_matches = self
            .tactic
            .map(|tactic| technique.tactics.contains(&tactic))
            .unwrap_or(true);
        platform_matches && tactic_matches
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    techniques: Vec<Arc<Technique>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, technique: Technique) {
        self.techniques.push(Arc::new(technique));
    }

    pub fn all(&self) -> &[Arc<Technique>] {
        &self.techniques
    }

    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }

    pub fn list(&self, filter: &TechniqueFilter) -> Vec<Arc<Technique>> {
        self.techniques
            .iter()
            .filter(|technique| filter.matches(technique))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Technique>> {
        self.techniques
            .iter()
            .find(|technique| technique.id == id)
            .cloned()
    }

    /// Looks up every ID, failing on the first unknown one.
    pub fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<Technique>>> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id)
                    .ok_or_else(|| anyhow!("unknown technique {}", id))
            })
            .collect()
    }
}
