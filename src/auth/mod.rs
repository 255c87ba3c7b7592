// SPDX-License-Identifier: PMPL-1.0-or-later

//! Cloud authentication capability checks
//!
//! Each platform answers a single yes/no question before any lifecycle
//! transition runs. A "no" is fatal for the process, not a state-machine
//! error; the CLI exits on it.

use crate::types::Platform;
use std::env;
use std::path::PathBuf;

pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self, platform: Platform) -> bool;

    /// Troubleshooting text shown when `is_authenticated` says no.
    fn hint(&self, platform: Platform) -> String {
        format!("you are not authenticated against {}", platform)
    }
}

/// Checks that credentials and target selection are present in the
/// environment, the way each provider's SDK would discover them.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentAuthenticator;

impl Authenticator for EnvironmentAuthenticator {
    fn is_authenticated(&self, platform: Platform) -> bool {
        match platform {
            Platform::Aws => aws_configured(),
            Platform::Azure => env_set("AZURE_SUBSCRIPTION_ID"),
            Platform::Gcp => env_set("GOOGLE_PROJECT"),
            Platform::Kubernetes => kubeconfig_path().is_file(),
            Platform::Eks => aws_configured() && kubeconfig_path().is_file(),
            Platform::EntraId => env_set("AZURE_TENANT_ID"),
        }
    }

    fn hint(&self, platform: Platform) -> String {
        match platform {
            Platform::Aws => "you are not authenticated against AWS, or you have not set your \
                region (export AWS_REGION=xxx)"
                .to_string(),
            Platform::Azure => "you are not authenticated against Azure, or you have not set \
                your subscription (export AZURE_SUBSCRIPTION_ID=xxx)"
                .to_string(),
            Platform::Gcp => "you are not authenticated against GCP, or you have not set your \
                project (export GOOGLE_PROJECT=xxx)"
                .to_string(),
            Platform::Kubernetes => format!(
                "no kubeconfig found at {}; set KUBECONFIG or authenticate to a cluster",
                kubeconfig_path().display()
            ),
            Platform::Eks => "you need to be authenticated both to an AWS account and to an \
                EKS cluster (aws eks update-kubeconfig --name <cluster-name>)"
                .to_string(),
            Platform::EntraId => {
                "you are not authenticated against Entra ID (export AZURE_TENANT_ID=xxx)"
                    .to_string()
            }
        }
    }
}

fn env_set(key: &str) -> bool {
    env::var(key)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

fn aws_configured() -> bool {
    let has_region = env_set("AWS_REGION") || env_set("AWS_DEFAULT_REGION");
    let has_credentials = (env_set("AWS_ACCESS_KEY_ID") && env_set("AWS_SECRET_ACCESS_KEY"))
        || env_set("AWS_PROFILE")
        || env_set("AWS_WEB_IDENTITY_TOKEN_FILE")
        || env_set("AWS_CONTAINER_CREDENTIALS_FULL_URI")
        || home_dir()
            .map(|home| home.join(".aws").join("credentials").is_file())
            .unwrap_or(false);
    has_region && has_credentials
}

/// `KUBECONFIG` when set, otherwise `~/.kube/config`.
pub fn kubeconfig_path() -> PathBuf {
    match env::var_os("KUBECONFIG") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => home_dir()
            .unwrap_or_default()
            .join(".kube")
            .join("config"),
    }
}

/// Accepts every platform. For dry runs against local state and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeAuthenticated;

impl Authenticator for AssumeAuthenticated {
    fn is_authenticated(&self, _platform: Platform) -> bool {
        true
    }
}
