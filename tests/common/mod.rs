// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fakes shared by the integration tests

#![allow(dead_code)]

use cloud_ambush::auth::{AssumeAuthenticated, Authenticator};
use cloud_ambush::batch::RunnerFactory;
use cloud_ambush::runner::{LifecycleError, Runner};
use cloud_ambush::state::{FileSystemStateManager, StateError, StateStore};
use cloud_ambush::technique::Technique;
use cloud_ambush::terraform::{Provisioner, TerraformError};
use cloud_ambush::types::{Outputs, Platform, TechniqueState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Stand-in `terraform` binary: logs each subcommand to `calls.log` in the
/// working directory and answers `output` with two values.
pub const FAKE_TERRAFORM: &str = r#"#!/bin/sh
echo "$1 TF_IN_AUTOMATION=$TF_IN_AUTOMATION UA=$TF_APPEND_USER_AGENT" >> calls.log
case "$1" in
  output)
    echo '{"bucket": {"type": "string", "value": "b-1"}, "count": {"type": "number", "value": 2}}'
    ;;
  apply)
    if [ -f fail-apply ]; then
      echo 'Error: The argument "region" is required, but no definition was found.' >&2
      exit 1
    fi
    ;;
  destroy)
    if [ -f slow-destroy ]; then
      sleep 5
    fi
    ;;
esac
exit 0
"#;

#[cfg(unix)]
pub fn install_fake_terraform(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let binary = dir.join("terraform");
    std::fs::write(&binary, FAKE_TERRAFORM).unwrap();
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    binary
}

pub const TERRAFORM_SOURCE: &str = "resource \"aws_s3_bucket\" \"bucket\" {}\n";

/// Records every call and answers with canned outputs or failures.
#[derive(Default)]
pub struct FakeProvisioner {
    pub calls: Mutex<Vec<String>>,
    pub outputs: Outputs,
    pub fail_apply: bool,
    pub fail_destroy: bool,
}

impl FakeProvisioner {
    pub fn with_outputs(pairs: &[(&str, &str)]) -> Self {
        Self {
            outputs: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn failure(command: &str) -> TerraformError {
        TerraformError::Failed {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stderr: format!("{} exploded", command),
        }
    }
}

impl Provisioner for FakeProvisioner {
    fn apply_and_get_outputs(&self, _directory: &Path) -> Result<Outputs, TerraformError> {
        self.calls.lock().unwrap().push("apply".to_string());
        if self.fail_apply {
            return Err(Self::failure("apply"));
        }
        Ok(self.outputs.clone())
    }

    fn destroy(&self, _directory: &Path) -> Result<(), TerraformError> {
        self.calls.lock().unwrap().push("destroy".to_string());
        if self.fail_destroy {
            return Err(Self::failure("destroy"));
        }
        Ok(())
    }
}

pub struct DenyAll;

impl Authenticator for DenyAll {
    fn is_authenticated(&self, _platform: Platform) -> bool {
        false
    }
}

/// Counts invocations of a technique callback.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn provisioned(id: &str, detonations: &Counter) -> Technique {
    let counter = detonations.clone();
    Technique::new(id, Platform::Aws, move |_| {
        counter.hit();
        Ok(())
    })
    .with_prerequisites(TERRAFORM_SOURCE)
}

pub fn runner_for(
    root: &Path,
    technique: Technique,
    force: bool,
    provisioner: Arc<FakeProvisioner>,
) -> Runner {
    let technique = Arc::new(technique);
    let store = FileSystemStateManager::new(
        root,
        technique.id.clone(),
        technique.prerequisites_code.clone(),
    );
    Runner::new(
        technique,
        force,
        Box::new(store),
        provisioner,
        Arc::new(AssumeAuthenticated),
    )
    .expect("runner should build")
}

/// Builds runners over a real state root with one shared fake provisioner.
pub struct FakeFactory {
    pub root: PathBuf,
    pub provisioner: Arc<FakeProvisioner>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl FakeFactory {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            provisioner: Arc::new(FakeProvisioner::with_outputs(&[("bucket", "b-1")])),
            authenticator: Arc::new(AssumeAuthenticated),
        }
    }
}

impl RunnerFactory for FakeFactory {
    fn build(&self, technique: Arc<Technique>, force: bool) -> Result<Runner, LifecycleError> {
        let store = FileSystemStateManager::new(
            &self.root,
            technique.id.clone(),
            technique.prerequisites_code.clone(),
        );
        Runner::new(
            technique,
            force,
            Box::new(store),
            self.provisioner.clone(),
            self.authenticator.clone(),
        )
    }
}

/// In-memory state store, optionally refusing to persist state tokens.
#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<Option<TechniqueState>>,
    pub outputs: Mutex<Outputs>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_set_state: bool,
}

impl MemoryStore {
    pub fn in_state(state: TechniqueState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl StateStore for MemoryStore {
    fn root_directory(&self) -> &Path {
        Path::new("/nonexistent/cloud-ambush")
    }

    fn technique_directory(&self) -> PathBuf {
        self.root_directory().join("technique")
    }

    fn extract_technique(&self) -> Result<(), StateError> {
        self.record("extract");
        Ok(())
    }

    fn get_outputs(&self) -> Result<Outputs, StateError> {
        Ok(self.outputs.lock().unwrap().clone())
    }

    fn write_outputs(&self, outputs: &Outputs) -> Result<(), StateError> {
        self.record("write_outputs");
        *self.outputs.lock().unwrap() = outputs.clone();
        Ok(())
    }

    fn get_state(&self) -> Result<Option<TechniqueState>, StateError> {
        Ok(*self.state.lock().unwrap())
    }

    fn set_state(&self, state: TechniqueState) -> Result<(), StateError> {
        self.record(&format!("set_state {}", state.token()));
        if self.fail_set_state {
            return Err(StateError::Io {
                action: "writing",
                path: self.technique_directory().join(".state"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        *self.state.lock().unwrap() = Some(state);
        Ok(())
    }

    fn cleanup_technique(&self) -> Result<(), StateError> {
        self.record("cleanup");
        Ok(())
    }
}
