// SPDX-License-Identifier: PMPL-1.0-or-later

//! Technique lifecycle runner
//!
//! Drives one technique through COLD -> WARM -> DETONATED and back. The
//! persisted state token is read once at construction and rewritten after
//! every successful transition; guards are evaluated against the in-memory
//! copy. Every call blocks until its subprocesses and callbacks return.

mod cleanup;

pub use cleanup::{CleanupReport, CleanupStep, StepOutcome};

use crate::auth::Authenticator;
use crate::state::{StateError, StateStore};
use crate::technique::Technique;
use crate::terraform::Provisioner;
use crate::types::{Outputs, Platform, TechniqueState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{hint}")]
    NotAuthenticated { platform: Platform, hint: String },

    #[error(
        "{id} has already been detonated and is not idempotent. Revert it with 'cloud-ambush \
         revert' before detonating it again, or use --force"
    )]
    AlreadyDetonated { id: String },

    #[error("{id} is not in DETONATED state and should not need to be reverted, use --force to force")]
    NotDetonated { id: String },

    #[error("{id} is already COLD and should already be clean, use --force to force cleanup")]
    AlreadyCold { id: String },

    #[error("unable to extract Terraform file of {id}: {source}")]
    Extract {
        id: String,
        #[source]
        source: StateError,
    },

    #[error("unable to run terraform apply on prerequisites of {id}: {message}")]
    Provision { id: String, message: String },

    #[error("error while detonating attack technique {id}: {reason:#}")]
    Detonation { id: String, reason: anyhow::Error },

    #[error("unable to revert detonation of {id}: {reason:#}")]
    Revert { id: String, reason: anyhow::Error },

    #[error("unable to persist state of {id}: {source}")]
    State {
        id: String,
        #[source]
        source: StateError,
    },

    #[error("unable to fully clean up {}: {}", .report.technique_id, first_failure(.report))]
    CleanupIncomplete { report: CleanupReport },
}

impl LifecycleError {
    /// Wrong-state transition without force. Safe to retry with force.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            LifecycleError::AlreadyDetonated { .. }
                | LifecycleError::NotDetonated { .. }
                | LifecycleError::AlreadyCold { .. }
        )
    }

    /// Precondition failures the process should not continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LifecycleError::NotAuthenticated { .. })
    }
}

fn first_failure(report: &CleanupReport) -> String {
    report
        .first_error()
        .map(|outcome| {
            format!(
                "{} failed: {}",
                outcome.step,
                outcome.error.as_deref().unwrap_or_default()
            )
        })
        .unwrap_or_default()
}

/// One technique, one invocation. Never run two runners for the same
/// technique at the same time: nothing guards the state files.
pub struct Runner {
    technique: Arc<Technique>,
    force: bool,
    state: TechniqueState,
    terraform_dir: PathBuf,
    state_store: Box<dyn StateStore>,
    provisioner: Arc<dyn Provisioner>,
    authenticator: Arc<dyn Authenticator>,
    authenticated: bool,
}

impl Runner {
    pub fn new(
        technique: Arc<Technique>,
        force: bool,
        state_store: Box<dyn StateStore>,
        provisioner: Arc<dyn Provisioner>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, LifecycleError> {
        let state = state_store
            .get_state()
            .map_err(|source| LifecycleError::State {
                id: technique.id.clone(),
                source,
            })?
            .unwrap_or_default();
        let terraform_dir = state_store.technique_directory();

        Ok(Self {
            technique,
            force,
            state,
            terraform_dir,
            state_store,
            provisioner,
            authenticator,
            authenticated: false,
        })
    }

    pub fn technique(&self) -> &Technique {
        &self.technique
    }

    pub fn state(&self) -> TechniqueState {
        self.state
    }

    pub fn terraform_dir(&self) -> &Path {
        &self.terraform_dir
    }

    /// Provisions the prerequisites unless they are already up, and returns
    /// the outputs detonation will receive.
    pub fn warm_up(&mut self) -> Result<Outputs, LifecycleError> {
        self.ensure_authenticated()?;

        if !self.technique.has_prerequisites() {
            return self.persisted_outputs();
        }

        self.state_store
            .extract_technique()
            .map_err(|source| LifecycleError::Extract {
                id: self.technique.id.clone(),
                source,
            })?;

        let skip = match self.state {
            TechniqueState::Warm if !self.force => {
                log::info!(
                    "Not warming up - {} is already warm. Use --force to force",
                    self.technique.id
                );
                true
            }
            TechniqueState::Detonated => {
                log::info!(
                    "{} has been detonated but not cleaned up, not warming up as it should be warm already",
                    self.technique.id
                );
                true
            }
            _ => false,
        };
        if skip {
            return self.persisted_outputs();
        }

        log::info!("Warming up {}", self.technique.id);
        if self.technique.is_slow {
            log::info!("Note: this is a slow attack technique, warming up might take a while");
        }

        let outputs = match self.provisioner.apply_and_get_outputs(&self.terraform_dir) {
            Ok(outputs) => outputs,
            Err(err) => {
                log::warn!(
                    "Error during warm up of {}. Cleaning up prerequisites with terraform destroy",
                    self.technique.id
                );
                if let Err(destroy_err) = self.provisioner.destroy(&self.terraform_dir) {
                    log::warn!("terraform destroy after failed apply: {}", destroy_err);
                }
                return Err(LifecycleError::Provision {
                    id: self.technique.id.clone(),
                    message: err.explain(),
                });
            }
        };

        self.state_store
            .write_outputs(&outputs)
            .map_err(|source| self.state_error(source))?;
        self.set_state(TechniqueState::Warm)?;

        if let Some(display) = outputs.get("display") {
            log::info!("{}", display.replace("\\n", "\n"));
        }
        Ok(outputs)
    }

    pub fn detonate(&mut self) -> Result<(), LifecycleError> {
        self.ensure_authenticated()?;

        if self.state == TechniqueState::Detonated
            && !self.technique.is_idempotent
            && !self.force
        {
            return Err(LifecycleError::AlreadyDetonated {
                id: self.technique.id.clone(),
            });
        }

        let outputs = self.warm_up()?;

        log::info!("Detonating {}", self.technique.id);
        (self.technique.detonate)(&outputs).map_err(|reason| LifecycleError::Detonation {
            id: self.technique.id.clone(),
            reason,
        })?;

        self.set_state(TechniqueState::Detonated)
    }

    pub fn revert(&mut self) -> Result<(), LifecycleError> {
        self.ensure_authenticated()?;

        if self.state != TechniqueState::Detonated && !self.force {
            return Err(LifecycleError::NotDetonated {
                id: self.technique.id.clone(),
            });
        }

        let outputs = self.persisted_outputs()?;

        log::info!("Reverting detonation of technique {}", self.technique.id);
        if let Some(revert) = &self.technique.revert {
            revert(&outputs).map_err(|reason| LifecycleError::Revert {
                id: self.technique.id.clone(),
                reason,
            })?;
        }

        self.set_state(TechniqueState::Warm)
    }

    /// Reverts (only from DETONATED), runs the technique's own teardown,
    /// destroys the prerequisites and removes the technique directory.
    /// Every step runs even when an earlier one failed; the state always
    /// ends COLD.
    pub fn clean_up(&mut self) -> Result<CleanupReport, LifecycleError> {
        self.ensure_authenticated()?;

        if self.state == TechniqueState::Cold && !self.force {
            return Err(LifecycleError::AlreadyCold {
                id: self.technique.id.clone(),
            });
        }

        log::info!("Cleaning up {}", self.technique.id);
        let mut report = CleanupReport::new(self.technique.id.clone());

        if self.technique.is_revertible() && self.state == TechniqueState::Detonated {
            let result = self.revert();
            if let Err(err) = &result {
                log::warn!("{}; cleaning up anyway", err);
            }
            report.record(CleanupStep::Revert, result);
        }

        if let Some(cleanup) = self.technique.cleanup.clone() {
            let result = cleanup();
            if let Err(err) = &result {
                log::warn!("technique cleanup of {} failed: {:#}", self.technique.id, err);
            }
            report.record(CleanupStep::TechniqueCleanup, result.map_err(|e| format!("{:#}", e)));
        }

        if self.technique.has_prerequisites() {
            log::info!("Cleaning up technique prerequisites with terraform destroy");
            let result = self
                .provisioner
                .destroy(&self.terraform_dir)
                .map_err(|e| e.explain());
            if let Err(err) = &result {
                log::warn!("unable to clean up prerequisites of {}: {}", self.technique.id, err);
            }
            report.record(CleanupStep::Destroy, result);
        }

        let result = self.state_store.set_state(TechniqueState::Cold);
        if let Err(err) = &result {
            log::warn!("unable to persist COLD state of {}: {}", self.technique.id, err);
        }
        self.state = TechniqueState::Cold;
        report.record(CleanupStep::PersistState, result);

        let result = self.state_store.cleanup_technique();
        if let Err(err) = &result {
            log::warn!(
                "unable to remove technique directory {}: {}",
                self.terraform_dir.display(),
                err
            );
        }
        report.record(CleanupStep::RemoveDirectory, result);

        if report.is_complete() {
            Ok(report)
        } else {
            Err(LifecycleError::CleanupIncomplete { report })
        }
    }

    fn ensure_authenticated(&mut self) -> Result<(), LifecycleError> {
        if self.authenticated {
            return Ok(());
        }
        let platform = self.technique.platform;
        if !self.authenticator.is_authenticated(platform) {
            return Err(LifecycleError::NotAuthenticated {
                platform,
                hint: self.authenticator.hint(platform),
            });
        }
        self.authenticated = true;
        Ok(())
    }

    fn persisted_outputs(&self) -> Result<Outputs, LifecycleError> {
        self.state_store
            .get_outputs()
            .map_err(|source| self.state_error(source))
    }

    fn set_state(&mut self, state: TechniqueState) -> Result<(), LifecycleError> {
        self.state_store
            .set_state(state)
            .map_err(|source| self.state_error(source))?;
        self.state = state;
        Ok(())
    }

    fn state_error(&self, source: StateError) -> LifecycleError {
        LifecycleError::State {
            id: self.technique.id.clone(),
            source,
        }
    }
}
