//! Privilege elevation for the `nft` command
//!
//! nftset-api is normally run as root (or with `CAP_NET_ADMIN`) and executes
//! `nft` directly. When it runs unprivileged, an explicit elevation method
//! can be configured; the service never guesses one.
//!
//! # Elevation Strategy
//!
//! - **Root or no method configured**: run `nft` directly
//! - **`sudo`**: `sudo -n nft ...` (requires a NOPASSWD sudoers rule, never prompts)
//! - **`run0`**: `run0 nft ...` (systemd v256+, no SUID)
//!
//! # Security
//!
//! - Only the configured nft binary is ever elevated
//! - Arguments are passed directly without shell interpolation
//! - Binaries (sudo/run0, nft) are checked for availability first

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;

/// How to gain privileges for `nft` when not running as root.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElevationMethod {
    Sudo,
    Run0,
}

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// The nft binary itself was not found
    #[error("command not found: {0}")]
    ProgramNotFound(String),

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),
}

/// Checks if a binary exists, either as a path or by searching `PATH`.
fn binary_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Creates an `nft` command, elevated when configured and not already root.
///
/// # Arguments
///
/// * `program` - nft binary name or path
/// * `method` - elevation method, `None` to always run directly
/// * `args` - arguments passed to nft
///
/// The returned command has `kill_on_drop` set, so a request that is
/// abandoned mid-flight never leaves an `nft` process behind.
pub fn create_nft_command(
    program: &str,
    method: Option<ElevationMethod>,
    args: &[&str],
) -> Result<Command, ElevationError> {
    if !binary_exists(program) {
        return Err(ElevationError::ProgramNotFound(program.to_string()));
    }

    let is_root = nix::unistd::getuid().is_root();

    let mut cmd = match method {
        Some(_) if is_root => Command::new(program),
        None => Command::new(program),
        Some(ElevationMethod::Sudo) => {
            if !binary_exists("sudo") {
                return Err(ElevationError::MethodNotAvailable("sudo".into()));
            }
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        }
        Some(ElevationMethod::Run0) => {
            if !binary_exists("run0") {
                return Err(ElevationError::MethodNotAvailable("run0".into()));
            }
            let mut cmd = Command::new("run0");
            cmd.arg(program);
            cmd
        }
    };

    cmd.args(args).kill_on_drop(true);
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        assert!(binary_exists("/bin/sh"));
        // This should not exist
        assert!(!binary_exists("nftset_nonexistent_binary_xyz"));
        assert!(!binary_exists("/nonexistent/nft"));
    }

    #[test]
    fn test_missing_program_is_reported() {
        let result = create_nft_command("nftset_nonexistent_binary_xyz", None, &["list", "tables"]);
        let err = result.unwrap_err();
        assert!(matches!(err, ElevationError::ProgramNotFound(_)));
        assert!(err.to_string().contains("command not found"));
    }

    #[test]
    fn test_direct_command_without_method() {
        let cmd = create_nft_command("sh", None, &["-c", "true"]).unwrap();
        assert_eq!(cmd.as_std().get_program(), "sh");
    }

    #[test]
    fn test_method_parsing_case_insensitive() {
        assert_eq!("SUDO".parse::<ElevationMethod>().unwrap(), ElevationMethod::Sudo);
        assert_eq!("run0".parse::<ElevationMethod>().unwrap(), ElevationMethod::Run0);
        assert!("pkexec".parse::<ElevationMethod>().is_err());
    }
}
