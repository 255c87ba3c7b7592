// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-step outcome of a best-effort cleanup.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupStep {
    Revert,
    TechniqueCleanup,
    Destroy,
    PersistState,
    RemoveDirectory,
}

impl CleanupStep {
    pub fn label(&self) -> &'static str {
        match self {
            CleanupStep::Revert => "revert detonation",
            CleanupStep::TechniqueCleanup => "technique cleanup",
            CleanupStep::Destroy => "terraform destroy",
            CleanupStep::PersistState => "persist COLD state",
            CleanupStep::RemoveDirectory => "remove technique directory",
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: CleanupStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every step a cleanup attempted, in order. Steps that did not apply
/// (no revert callback, no prerequisites) are absent.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub technique_id: String,
    pub steps: Vec<StepOutcome>,
}

impl CleanupReport {
    pub fn new(technique_id: impl Into<String>) -> Self {
        Self {
            technique_id: technique_id.into(),
            steps: Vec::new(),
        }
    }

    pub fn record<E: fmt::Display>(&mut self, step: CleanupStep, result: Result<(), E>) {
        self.steps.push(StepOutcome {
            step,
            error: result.err().map(|e| e.to_string()),
        });
    }

    pub fn attempted(&self, step: CleanupStep) -> bool {
        self.steps.iter().any(|outcome| outcome.step == step)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|outcome| !outcome.succeeded())
    }

    /// The earliest failed step, which is what callers report.
    pub fn first_error(&self) -> Option<&StepOutcome> {
        self.failures().next()
    }

    pub fn is_complete(&self) -> bool {
        self.first_error().is_none()
    }
}
