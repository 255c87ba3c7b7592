// SPDX-License-Identifier: PMPL-1.0-or-later

//! Terraform provisioning backend
//!
//! Drives a pinned Terraform binary as a subprocess against a technique
//! directory. The directory must already contain the extracted source.

mod install;

pub use install::{download_url, install, release_platform, verify_checksum};

use crate::types::Outputs;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const TERRAFORM_VERSION: &str = "1.1.2";
pub const INITIALIZED_MARKER: &str = ".terraform-initialized";

const MISSING_REGION_MESSAGE: &str =
    "The argument \"region\" is required, but no definition was found";

#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("unable to run terraform {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("terraform {command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("terraform {command} did not finish within {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("unable to read terraform outputs: {0}")]
    Outputs(String),

    #[error("unable to mark {} as initialized: {source}", .path.display())]
    Marker {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to install terraform {version}: {reason}")]
    Install { version: String, reason: String },
}

impl TerraformError {
    /// Operator-facing message, with a hint for the usual missing-region failure.
    pub fn explain(&self) -> String {
        let message = self.to_string();
        if message.contains(MISSING_REGION_MESSAGE) {
            format!(
                "unable to create attack technique prerequisites. Ensure you are authenticated \
                 against AWS and have the right permissions.\nTerraform returned:\n{}",
                message
            )
        } else {
            message
        }
    }
}

/// Turns a Terraform directory into live resources and back.
pub trait Provisioner: Send + Sync {
    /// Runs `init` once per directory, then `apply`, and returns the outputs.
    fn apply_and_get_outputs(&self, directory: &Path) -> Result<Outputs, TerraformError>;

    fn destroy(&self, directory: &Path) -> Result<(), TerraformError>;
}

#[derive(Debug, Clone)]
pub struct TerraformManager {
    binary_path: PathBuf,
    version: String,
    user_agent: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    value: serde_json::Value,
}

impl TerraformManager {
    pub fn new(binary_path: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            version: TERRAFORM_VERSION.to_string(),
            user_agent: user_agent.into(),
            timeout: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Caps every terraform subprocess at `timeout` wall-clock time.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Installs the pinned binary when it is missing.
    pub fn initialize(&self) -> Result<(), TerraformError> {
        if self.binary_path.is_file() {
            return Ok(());
        }
        log::info!("Installing Terraform in {}", self.binary_path.display());
        install(&self.version, &self.binary_path)
    }

    fn run(&self, directory: &Path, args: &[&str]) -> Result<Output, TerraformError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let child = Command::new(&self.binary_path)
            .args(args)
            .current_dir(directory)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_APPEND_USER_AGENT", &self.user_agent)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TerraformError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = match self.timeout {
            Some(timeout) => wait_with_deadline(child, timeout).map_err(|e| match e {
                DeadlineError::Io(source) => TerraformError::Spawn {
                    command: command.clone(),
                    source,
                },
                DeadlineError::Expired => TerraformError::Timeout {
                    command: command.clone(),
                    timeout,
                },
            })?,
            None => child
                .wait_with_output()
                .map_err(|source| TerraformError::Spawn {
                    command: command.clone(),
                    source,
                })?,
        };

        if !output.status.success() {
            return Err(TerraformError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Provisioner for TerraformManager {
    fn apply_and_get_outputs(&self, directory: &Path) -> Result<Outputs, TerraformError> {
        let marker = directory.join(INITIALIZED_MARKER);
        if !marker.exists() {
            log::info!("Initializing Terraform to spin up technique prerequisites");
            self.run(directory, &["init", "-input=false", "-no-color"])?;
            fs::write(&marker, b"").map_err(|source| TerraformError::Marker {
                path: marker.clone(),
                source,
            })?;
        }

        log::info!("Applying Terraform to spin up technique prerequisites");
        self.run(
            directory,
            &[
                "apply",
                "-auto-approve",
                "-input=false",
                "-refresh=false",
                "-no-color",
            ],
        )?;

        let output = self.run(directory, &["output", "-json", "-no-color"])?;
        parse_outputs(&output.stdout)
    }

    fn destroy(&self, directory: &Path) -> Result<(), TerraformError> {
        if !directory.is_dir() {
            log::debug!(
                "{} does not exist, nothing to destroy",
                directory.display()
            );
            return Ok(());
        }
        self.run(
            directory,
            &["destroy", "-auto-approve", "-input=false", "-no-color"],
        )?;
        Ok(())
    }
}

/// Decodes `terraform output -json`. Each value keeps its JSON rendering
/// minus the outer quotes, so strings come back bare.
pub fn parse_outputs(raw: &[u8]) -> Result<Outputs, TerraformError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Outputs::new());
    }
    let decoded: HashMap<String, RawOutput> =
        serde_json::from_slice(raw).map_err(|e| TerraformError::Outputs(e.to_string()))?;

    Ok(decoded
        .into_iter()
        .map(|(name, output)| {
            let rendered = output.value.to_string();
            (name, strip_outer_quotes(&rendered).to_string())
        })
        .collect())
}

fn strip_outer_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

enum DeadlineError {
    Io(io::Error),
    Expired,
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> Result<Output, DeadlineError> {
    // Drain both pipes concurrently so a chatty apply cannot fill a pipe and stall.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(DeadlineError::Io)? {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeadlineError::Expired);
        }
        thread::sleep(Duration::from_millis(50));
    };

    Ok(Output {
        status,
        stdout: stdout.map(collect).unwrap_or_default(),
        stderr: stderr.map(collect).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}
