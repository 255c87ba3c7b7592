// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persistent per-technique state on disk
//!
//! Layout under the state root:
//!
//! ```text
//! <root>/<technique-id>/main.tf                 extracted Terraform source
//! <root>/<technique-id>/.terraform-outputs      JSON object of string outputs
//! <root>/<technique-id>/.state                  "cold", "warm" or "detonated"
//! <root>/<technique-id>/.terraform-initialized  written by the provisioner
//! ```
//!
//! There is no locking. Runners for different techniques never share a
//! directory; two runners for the same technique at once are a caller error.

use crate::types::{Outputs, TechniqueState};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TERRAFORM_FILE_NAME: &str = "main.tf";
pub const OUTPUTS_FILE_NAME: &str = ".terraform-outputs";
pub const STATE_FILE_NAME: &str = ".state";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed outputs in {}: {source}", .path.display())]
    Outputs {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt state token {token:?} in {}", .path.display())]
    CorruptState { path: PathBuf, token: String },

    #[error("technique ID {id:?} cannot name a state directory")]
    InvalidTechniqueId { id: String },
}

impl StateError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        StateError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A technique ID must name exactly one directory under the state root.
pub fn validate_technique_id(id: &str) -> Result<(), StateError> {
    let invalid = id.trim().is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if invalid {
        Err(StateError::InvalidTechniqueId { id: id.to_string() })
    } else {
        Ok(())
    }
}

/// Filesystem projection of one technique's lifecycle.
pub trait StateStore: Send {
    fn root_directory(&self) -> &Path;

    fn technique_directory(&self) -> PathBuf;

    /// Writes the prerequisite Terraform source into the technique directory.
    fn extract_technique(&self) -> Result<(), StateError>;

    /// Persisted outputs, or an empty map when none were ever written.
    fn get_outputs(&self) -> Result<Outputs, StateError>;

    fn write_outputs(&self, outputs: &Outputs) -> Result<(), StateError>;

    /// Persisted state, `None` when no token has been written yet.
    fn get_state(&self) -> Result<Option<TechniqueState>, StateError>;

    fn set_state(&self, state: TechniqueState) -> Result<(), StateError>;

    /// Removes the technique directory and everything in it.
    fn cleanup_technique(&self) -> Result<(), StateError>;
}

#[derive(Debug, Clone)]
pub struct FileSystemStateManager {
    root: PathBuf,
    technique_id: String,
    prerequisites_code: Option<Vec<u8>>,
}

impl FileSystemStateManager {
    pub fn new(
        root: impl Into<PathBuf>,
        technique_id: impl Into<String>,
        prerequisites_code: Option<Vec<u8>>,
    ) -> Self {
        Self {
            root: root.into(),
            technique_id: technique_id.into(),
            prerequisites_code,
        }
    }

    /// The technique directory, refusing IDs that would escape the root.
    fn checked_directory(&self) -> Result<PathBuf, StateError> {
        validate_technique_id(&self.technique_id)?;
        Ok(self.technique_directory())
    }

    fn outputs_file(&self) -> Result<PathBuf, StateError> {
        Ok(self.checked_directory()?.join(OUTPUTS_FILE_NAME))
    }

    fn state_file(&self) -> Result<PathBuf, StateError> {
        Ok(self.checked_directory()?.join(STATE_FILE_NAME))
    }

    fn ensure_technique_directory(&self) -> Result<PathBuf, StateError> {
        let directory = self.checked_directory()?;
        if !directory.is_dir() {
            if !self.root.exists() {
                log::info!("Creating {} as it doesn't exist yet", self.root.display());
            }
            fs::create_dir_all(&directory)
                .map_err(|e| StateError::io("creating", &directory, e))?;
        }
        Ok(directory)
    }
}

impl StateStore for FileSystemStateManager {
    fn root_directory(&self) -> &Path {
        &self.root
    }

    fn technique_directory(&self) -> PathBuf {
        self.root.join(&self.technique_id)
    }

    fn extract_technique(&self) -> Result<(), StateError> {
        let directory = self.ensure_technique_directory()?;
        let terraform_file = directory.join(TERRAFORM_FILE_NAME);
        // Extracted once; later calls keep the file Terraform already knows.
        if terraform_file.exists() {
            return Ok(());
        }
        let code = self.prerequisites_code.as_deref().unwrap_or_default();
        fs::write(&terraform_file, code)
            .map_err(|e| StateError::io("writing", &terraform_file, e))
    }

    fn get_outputs(&self) -> Result<Outputs, StateError> {
        let path = self.outputs_file()?;
        if !path.exists() {
            return Ok(Outputs::new());
        }
        let raw = fs::read(&path).map_err(|e| StateError::io("reading", &path, e))?;
        serde_json::from_slice(&raw).map_err(|source| StateError::Outputs { path, source })
    }

    fn write_outputs(&self, outputs: &Outputs) -> Result<(), StateError> {
        self.ensure_technique_directory()?;
        let path = self.outputs_file()?;
        let payload = serde_json::to_vec(outputs).map_err(|source| StateError::Outputs {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, payload).map_err(|e| StateError::io("writing", &path, e))
    }

    fn get_state(&self) -> Result<Option<TechniqueState>, StateError> {
        let path = self.state_file()?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io("reading", &path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        TechniqueState::from_token(&raw)
            .map(Some)
            .ok_or(StateError::CorruptState {
                path,
                token: raw.trim().to_string(),
            })
    }

    fn set_state(&self, state: TechniqueState) -> Result<(), StateError> {
        self.ensure_technique_directory()?;
        let path = self.state_file()?;
        fs::write(&path, state.token()).map_err(|e| StateError::io("writing", &path, e))
    }

    fn cleanup_technique(&self) -> Result<(), StateError> {
        let directory = self.checked_directory()?;
        match fs::remove_dir_all(&directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io("removing", &directory, e)),
        }
    }
}
