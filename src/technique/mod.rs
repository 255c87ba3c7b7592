// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attack technique descriptors
//!
//! A technique always knows how to detonate. Reverting a detonation and
//! tearing down extra state beyond the provisioned infrastructure are
//! optional capabilities, checked before the runner invokes them.

use crate::types::{Outputs, Platform, Tactic};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// Detonation or revert callback. Receives the persisted provisioning outputs.
pub type ActionFn = Arc<dyn Fn(&Outputs) -> Result<()> + Send + Sync>;

/// Extra teardown callback run during cleanup.
pub type CleanupFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Technique {
    /// Globally unique identifier, also the on-disk state directory name
    pub id: String,
    pub friendly_name: String,
    pub description: String,
    /// Pointers for building detections of this technique
    pub detection: String,
    pub platform: Platform,
    pub tactics: Vec<Tactic>,
    /// Whether detonation can be repeated without reverting first
    pub is_idempotent: bool,
    /// Warm-up or detonation is expected to take minutes
    pub is_slow: bool,
    /// Terraform source for the prerequisite infrastructure
    pub prerequisites_code: Option<Vec<u8>>,
    pub detonate: ActionFn,
    pub revert: Option<ActionFn>,
    pub cleanup: Option<CleanupFn>,
}

impl Technique {
    pub fn new<F>(id: impl Into<String>, platform: Platform, detonate: F) -> Self
    where
        F: Fn(&Outputs) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            friendly_name: String::new(),
            description: String::new(),
            detection: String::new(),
            platform,
            tactics: Vec::new(),
            is_idempotent: false,
            is_slow: false,
            prerequisites_code: None,
            detonate: Arc::new(detonate),
            revert: None,
            cleanup: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_detection(mut self, detection: impl Into<String>) -> Self {
        self.detection = detection.into();
        self
    }

    pub fn with_tactics(mut self, tactics: Vec<Tactic>) -> Self {
        self.tactics = tactics;
        self
    }

    pub fn idempotent(mut self, is_idempotent: bool) -> Self {
        self.is_idempotent = is_idempotent;
        self
    }

    pub fn slow(mut self, is_slow: bool) -> Self {
        self.is_slow = is_slow;
        self
    }

    pub fn with_prerequisites(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.prerequisites_code = Some(code.into());
        self
    }

    pub fn with_revert<F>(mut self, revert: F) -> Self
    where
        F: Fn(&Outputs) -> Result<()> + Send + Sync + 'static,
    {
        self.revert = Some(Arc::new(revert));
        self
    }

    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.cleanup = Some(Arc::new(cleanup));
        self
    }

    pub fn has_prerequisites(&self) -> bool {
        self.prerequisites_code.is_some()
    }

    pub fn is_revertible(&self) -> bool {
        self.revert.is_some()
    }

    /// Friendly name when set, otherwise the ID.
    pub fn display_name(&self) -> &str {
        if self.friendly_name.is_empty() {
            &self.id
        } else {
            &self.friendly_name
        }
    }
}

impl fmt::Debug for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Technique")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("tactics", &self.tactics)
            .field("is_idempotent", &self.is_idempotent)
            .field("has_prerequisites", &self.has_prerequisites())
            .field("revertible", &self.is_revertible())
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
