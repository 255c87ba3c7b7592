// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pinned Terraform installation from the HashiCorp release site.

use super::TerraformError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

const RELEASES_URL: &str = "https://releases.hashicorp.com/terraform";

/// HashiCorp's `(os, arch)` naming for the running host.
pub fn release_platform() -> Option<(&'static str, &'static str)> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        "freebsd" => "freebsd",
        _ => return None,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        _ => return None,
    };
    Some((os, arch))
}

pub fn archive_name(version: &str, os: &str, arch: &str) -> String {
    format!("terraform_{}_{}_{}.zip", version, os, arch)
}

pub fn download_url(version: &str, os: &str, arch: &str) -> String {
    format!("{}/{}/{}", RELEASES_URL, version, archive_name(version, os, arch))
}

fn checksums_url(version: &str) -> String {
    format!("{}/{}/terraform_{}_SHA256SUMS", RELEASES_URL, version, version)
}

/// Checks `archive` against its line in a `SHA256SUMS` listing.
pub fn verify_checksum(
    archive: &[u8],
    archive_name: &str,
    checksums: &str,
) -> Result<(), String> {
    let expected = checksums
        .lines()
        .filter_map(|line| line.split_once(char::is_whitespace))
        .find(|(_, name)| name.trim() == archive_name)
        .map(|(digest, _)| digest.trim().to_ascii_lowercase())
        .ok_or_else(|| format!("no checksum listed for {}", archive_name))?;

    let actual = hex::encode(Sha256::digest(archive));
    if actual == expected {
        Ok(())
    } else {
        Err(format!(
            "checksum mismatch for {} (expected {}, got {})",
            archive_name, expected, actual
        ))
    }
}

/// Downloads, verifies and unpacks the pinned release so that
/// `binary_path` exists afterwards.
pub fn install(version: &str, binary_path: &Path) -> Result<(), TerraformError> {
    let fail = |reason: String| TerraformError::Install {
        version: version.to_string(),
        reason,
    };

    let (os, arch) =
        release_platform().ok_or_else(|| fail("unsupported host platform".to_string()))?;
    let install_dir = binary_path
        .parent()
        .ok_or_else(|| fail(format!("invalid binary path {}", binary_path.display())))?;
    let staging = install_dir.join(format!(".download-{}", version));
    fs::create_dir_all(&staging)
        .map_err(|e| fail(format!("creating {}: {}", staging.display(), e)))?;

    let result = (|| {
        let name = archive_name(version, os, arch);
        let archive_path = staging.join(&name);
        let sums_path = staging.join("SHA256SUMS");

        fetch(&download_url(version, os, arch), &archive_path)?;
        fetch(&checksums_url(version), &sums_path)?;

        let archive = fs::read(&archive_path)
            .map_err(|e| format!("reading {}: {}", archive_path.display(), e))?;
        let sums = fs::read_to_string(&sums_path)
            .map_err(|e| format!("reading {}: {}", sums_path.display(), e))?;
        verify_checksum(&archive, &name, &sums)?;

        unpack(&archive_path, install_dir)?;
        let unpacked = install_dir.join(if os == "windows" {
            "terraform.exe"
        } else {
            "terraform"
        });
        if unpacked != binary_path {
            fs::rename(&unpacked, binary_path)
                .map_err(|e| format!("moving binary to {}: {}", binary_path.display(), e))?;
        }
        make_executable(binary_path)
    })();

    let _ = fs::remove_dir_all(&staging);
    result.map_err(fail)
}

fn fetch(url: &str, destination: &Path) -> Result<(), String> {
    log::debug!("Downloading {}", url);
    let output = Command::new("curl")
        .args(["--fail", "--silent", "--show-error", "--location", "--output"])
        .arg(destination)
        .arg(url)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("unable to run curl: {}", e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "downloading {} failed: {}",
            url,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn unpack(archive: &Path, destination: &Path) -> Result<(), String> {
    let output = Command::new("unzip")
        .arg("-o")
        .arg("-q")
        .arg(archive)
        .arg("-d")
        .arg(destination)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("unable to run unzip: {}", e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "unpacking {} failed: {}",
            archive.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| format!("setting permissions on {}: {}", path.display(), e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}
