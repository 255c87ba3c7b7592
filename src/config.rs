// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration loading.

use crate::batch::DEFAULT_WORKER_COUNT;
use crate::terraform::TERRAFORM_VERSION;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOME_ENV: &str = "CLOUD_AMBUSH_HOME";
pub const STATE_DIRECTORY_NAME: &str = ".cloud-ambush";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Holds one directory per technique plus the Terraform install
    pub state_root: PathBuf,
    pub terraform_version: String,
    /// Existing binary to use instead of the managed install
    pub terraform_binary: Option<PathBuf>,
    pub worker_count: usize,
    pub provisioning_timeout_secs: Option<u64>,
    /// Technique catalogs loaded at startup; relative paths resolve
    /// against the config file's directory
    pub catalogs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            terraform_version: TERRAFORM_VERSION.to_string(),
            terraform_binary: None,
            worker_count: DEFAULT_WORKER_COUNT,
            provisioning_timeout_secs: None,
            catalogs: Vec::new(),
        }
    }
}

/// `$CLOUD_AMBUSH_HOME`, else `$HOME/.cloud-ambush`, else `./.cloud-ambush`.
pub fn default_state_root() -> PathBuf {
    if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(root);
    }
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIRECTORY_NAME)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parsing json config {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing yaml config {}", path.display()))?,
            _ => {
                return Err(anyhow!(
                    "unsupported config extension for {}",
                    path.display()
                ))
            }
        };

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        // The environment wins over the file so one config can serve many homes.
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            config.state_root = PathBuf::from(root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Explicit file if given, else `<state_root>/config.yaml` when present,
    /// else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let implicit = default_state_root().join(DEFAULT_CONFIG_FILE);
        if implicit.is_file() {
            return Self::load(&implicit);
        }
        Ok(Self::default())
    }

    pub fn terraform_binary_path(&self) -> PathBuf {
        self.terraform_binary.clone().unwrap_or_else(|| {
            self.state_root.join("terraform").join(if cfg!(windows) {
                "terraform.exe"
            } else {
                "terraform"
            })
        })
    }

    pub fn provisioning_timeout(&self) -> Option<Duration> {
        self.provisioning_timeout_secs.map(Duration::from_secs)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let absolutize = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.catalogs.iter_mut().for_each(absolutize);
        if let Some(binary) = self.terraform_binary.as_mut() {
            absolutize(binary);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(anyhow!("worker_count must be at least 1"));
        }
        if self.terraform_version.trim().is_empty() {
            return Err(anyhow!("terraform_version must not be empty"));
        }
        if self.provisioning_timeout_secs == Some(0) {
            return Err(anyhow!("provisioning_timeout_secs must be positive"));
        }
        Ok(())
    }
}
