// SPDX-License-Identifier: PMPL-1.0-or-later

//! Command-backed technique catalogs
//!
//! A catalog file declares techniques whose detonation, revert and cleanup
//! are shell command lines. Provisioning outputs reach the commands as
//! `AMBUSH_OUTPUT_<KEY>` environment variables.
//!
//! ```yaml
//! techniques:
//!   - id: aws.defense-evasion.cloudtrail-stop
//!     name: Stop CloudTrail Trail
//!     platform: aws
//!     tactics: [defense-evasion]
//!     prerequisites: cloudtrail-stop/main.tf
//!     detonate: aws cloudtrail stop-logging --name "$AMBUSH_OUTPUT_TRAIL_NAME"
//!     revert: aws cloudtrail start-logging --name "$AMBUSH_OUTPUT_TRAIL_NAME"
//! ```

use crate::registry::Registry;
use crate::state::validate_technique_id;
use crate::technique::Technique;
use crate::types::{Outputs, Platform, Tactic};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const OUTPUT_ENV_PREFIX: &str = "AMBUSH_OUTPUT_";
pub const TECHNIQUE_ID_ENV: &str = "AMBUSH_TECHNIQUE_ID";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    #[serde(default)]
    pub techniques: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detection: String,
    pub platform: String,
    #[serde(default)]
    pub tactics: Vec<String>,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub slow: bool,
    /// Terraform file, relative to the catalog
    #[serde(default)]
    pub prerequisites: Option<PathBuf>,
    pub detonate: String,
    #[serde(default)]
    pub revert: Option<String>,
    #[serde(default)]
    pub cleanup: Option<String>,
}

impl CatalogFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parsing json catalog {}", path.display())),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing yaml catalog {}", path.display())),
            _ => Err(anyhow!(
                "unsupported catalog extension for {}",
                path.display()
            )),
        }
    }
}

impl CatalogEntry {
    /// Turns the entry into a technique, reading prerequisites from `base`.
    pub fn into_technique(self, base: &Path) -> Result<Technique> {
        validate_technique_id(&self.id)?;
        let platform = Platform::parse(&self.platform)
            .ok_or_else(|| anyhow!("{}: unknown platform {}", self.id, self.platform))?;
        let tactics = self
            .tactics
            .iter()
            .map(|name| {
                Tactic::parse(name)
                    .ok_or_else(|| anyhow!("{}: unknown MITRE ATT&CK tactic {}", self.id, name))
            })
            .collect::<Result<Vec<_>>>()?;
        if self.detonate.trim().is_empty() {
            bail!("{}: detonate command is empty", self.id);
        }

        let id = self.id.clone();
        let detonate = ShellAction::new(&id, "detonate", self.detonate);
        let mut technique = Technique::new(self.id, platform, move |outputs| detonate.run(outputs))
            .with_name(self.name)
            .with_description(self.description)
            .with_detection(self.detection)
            .with_tactics(tactics)
            .idempotent(self.idempotent)
            .slow(self.slow);

        if let Some(relative) = self.prerequisites {
            let path = base.join(relative);
            let code = fs::read(&path)
                .with_context(|| format!("{}: reading prerequisites {}", id, path.display()))?;
            technique = technique.with_prerequisites(code);
        }
        if let Some(command) = self.revert {
            let revert = ShellAction::new(&id, "revert", command);
            technique = technique.with_revert(move |outputs| revert.run(outputs));
        }
        if let Some(command) = self.cleanup {
            let cleanup = ShellAction::new(&id, "cleanup", command);
            technique = technique.with_cleanup(move || cleanup.run(&Outputs::new()));
        }
        Ok(technique)
    }
}

/// Loads every technique in `path` into `registry`. Returns how many were added.
/// Nothing is registered unless every entry is valid.
pub fn load_into(registry: &mut Registry, path: &Path) -> Result<usize> {
    let catalog = CatalogFile::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let techniques = catalog
        .techniques
        .into_iter()
        .map(|entry| entry.into_technique(base))
        .collect::<Result<Vec<_>>>()?;
    let count = techniques.len();
    for technique in techniques {
        registry.register(technique);
    }
    log::debug!("Loaded {} techniques from {}", count, path.display());
    Ok(count)
}

/// Environment variable name carrying output `key`.
pub fn output_env_name(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", OUTPUT_ENV_PREFIX, suffix)
}

#[derive(Debug, Clone)]
struct ShellAction {
    technique_id: String,
    phase: &'static str,
    command: String,
}

impl ShellAction {
    fn new(technique_id: &str, phase: &'static str, command: String) -> Self {
        Self {
            technique_id: technique_id.to_string(),
            phase,
            command,
        }
    }

    fn run(&self, outputs: &Outputs) -> Result<()> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(TECHNIQUE_ID_ENV, &self.technique_id)
            .envs(
                outputs
                    .iter()
                    .map(|(key, value)| (output_env_name(key), value)),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to execute {} command", self.phase))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            log::debug!("[{}] {}", self.technique_id, line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} command exited with {}: {}",
                self.phase,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}
