// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions for cloud-ambush
//!
//! Platforms, MITRE ATT&CK tactics and the three-token lifecycle state
//! shared by the registry, the state store and the runner.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Outputs of a provisioning run, passed verbatim to detonation and revert.
pub type Outputs = HashMap<String, String>;

/// Cloud or control plane targeted by a technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "aws", alias = "AWS")]
    Aws,
    #[serde(rename = "azure", alias = "Azure")]
    Azure,
    #[serde(rename = "gcp", alias = "GCP")]
    Gcp,
    #[serde(rename = "kubernetes", alias = "Kubernetes")]
    Kubernetes,
    #[serde(rename = "eks", alias = "EKS")]
    Eks,
    #[serde(rename = "entra-id", alias = "EntraID")]
    EntraId,
}

impl Platform {
    pub fn all() -> Vec<Self> {
        vec![
            Platform::Aws,
            Platform::Azure,
            Platform::Gcp,
            Platform::Kubernetes,
            Platform::Eks,
            Platform::EntraId,
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" => Some(Platform::Aws),
            "azure" => Some(Platform::Azure),
            "gcp" => Some(Platform::Gcp),
            "kubernetes" | "k8s" => Some(Platform::Kubernetes),
            "eks" => Some(Platform::Eks),
            "entra-id" | "entraid" | "entra_id" => Some(Platform::EntraId),
            _ => None,
        }
    }

    /// Formatted name used in tables and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Aws => "AWS",
            Platform::Azure => "Azure",
            Platform::Gcp => "GCP",
            Platform::Kubernetes => "Kubernetes",
            Platform::Eks => "EKS",
            Platform::EntraId => "Entra ID",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// MITRE ATT&CK enterprise tactics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tactic {
    Reconnaissance,
    ResourceDevelopment,
    InitialAccess,
    Execution,
    Persistence,
    PrivilegeEscalation,
    DefenseEvasion,
    CredentialAccess,
    Discovery,
    LateralMovement,
    Collection,
    CommandAndControl,
    Exfiltration,
    Impact,
}

impl Tactic {
    /// Parses a tactic name, tolerating case and `-`, `_` or space separators.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "reconnaissance" => Some(Tactic::Reconnaissance),
            "resourcedevelopment" => Some(Tactic::ResourceDevelopment),
            "initialaccess" => Some(Tactic::InitialAccess),
            "execution" => Some(Tactic::Execution),
            "persistence" => Some(Tactic::Persistence),
            "privilegeescalation" => Some(Tactic::PrivilegeEscalation),
            "defenseevasion" => Some(Tactic::DefenseEvasion),
            "credentialaccess" => Some(Tactic::CredentialAccess),
            "discovery" => Some(Tactic::Discovery),
            "lateralmovement" => Some(Tactic::LateralMovement),
            "collection" => Some(Tactic::Collection),
            "commandandcontrol" => Some(Tactic::CommandAndControl),
            "exfiltration" => Some(Tactic::Exfiltration),
            "impact" => Some(Tactic::Impact),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tactic::Reconnaissance => "Reconnaissance",
            Tactic::ResourceDevelopment => "Resource Development",
            Tactic::InitialAccess => "Initial Access",
            Tactic::Execution => "Execution",
            Tactic::Persistence => "Persistence",
            Tactic::PrivilegeEscalation => "Privilege Escalation",
            Tactic::DefenseEvasion => "Defense Evasion",
            Tactic::CredentialAccess => "Credential Access",
            Tactic::Discovery => "Discovery",
            Tactic::LateralMovement => "Lateral Movement",
            Tactic::Collection => "Collection",
            Tactic::CommandAndControl => "Command and Control",
            Tactic::Exfiltration => "Exfiltration",
            Tactic::Impact => "Impact",
        }
    }
}

impl fmt::Display for Tactic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a technique, persisted as a single lowercase token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechniqueState {
    /// No infrastructure provisioned, or already destroyed
    #[default]
    Cold,
    /// Prerequisites provisioned, not detonated (or reverted)
    Warm,
    /// Detonated and neither reverted nor cleaned up
    Detonated,
}

impl TechniqueState {
    pub fn token(&self) -> &'static str {
        match self {
            TechniqueState::Cold => "cold",
            TechniqueState::Warm => "warm",
            TechniqueState::Detonated => "detonated",
        }
    }

    /// Decodes a persisted token. Case is ignored so that upper-case tokens
    /// written by older releases still load; anything else is rejected.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "cold" => Some(TechniqueState::Cold),
            "warm" => Some(TechniqueState::Warm),
            "detonated" => Some(TechniqueState::Detonated),
            _ => None,
        }
    }
}

impl fmt::Display for TechniqueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token().to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_tokens_are_case_insensitive() {
        assert_eq!(TechniqueState::from_token("warm"), Some(TechniqueState::Warm));
        assert_eq!(
            TechniqueState::from_token("DETONATED\n"),
            Some(TechniqueState::Detonated)
        );
        assert_eq!(TechniqueState::from_token("lukewarm"), None);
        assert_eq!(TechniqueState::Cold.to_string(), "COLD");
    }

    #[test]
    fn test_tactic_parse_tolerates_separators() {
        assert_eq!(Tactic::parse("defense-evasion"), Some(Tactic::DefenseEvasion));
        assert_eq!(Tactic::parse("Defense Evasion"), Some(Tactic::DefenseEvasion));
        assert_eq!(Tactic::parse("command_and_control"), Some(Tactic::CommandAndControl));
        assert_eq!(Tactic::parse("teleportation"), None);
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("AWS"), Some(Platform::Aws));
        assert_eq!(Platform::parse("k8s"), Some(Platform::Kubernetes));
        assert_eq!(Platform::parse("mainframe"), None);
        assert_eq!(Platform::EntraId.to_string(), "Entra ID");
    }
}
