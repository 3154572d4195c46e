//! Built-in modules. Each one is a thin wrapper around a tool or file
//! operation, configured through serde and registered by
//! [`register_defaults`].

pub mod archive;
pub mod changelog;
pub mod checksum;
pub mod env;
pub mod git;
pub mod github;
pub mod go;
pub mod project;
pub mod release;
pub mod scp;
pub mod show;
pub mod skip_publish;
pub mod tarball;
pub mod upx;

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context as _, Result, bail};
use tracing::debug;

use crate::registry::{ANY_STAGE, ModuleKey, ModuleRegistry};

pub fn register_defaults(registry: &mut ModuleRegistry) {
    registry.register_module::<show::Show>(ANY_STAGE, "show", Vec::new());
    registry.register_module::<env::EnvCapture>("setup", "env", Vec::new());
    registry.register_module::<project::Project>("setup", "project", Vec::new());
    registry.register_module::<git::Git>("setup", "git", Vec::new());
    registry.register_module::<skip_publish::SkipPublish>(
        "setup",
        "skip_publish",
        vec![ModuleKey::new("setup", "env")],
    );
    registry.register_module::<go::GoBuild>(
        "build",
        "go",
        vec![
            ModuleKey::new("setup", "project"),
            ModuleKey::new("setup", "git"),
        ],
    );
    registry.register_module::<checksum::Checksum>("build", "checksum", Vec::new());
    registry.register_module::<archive::ZipArchive>("build", "zip", Vec::new());
    registry.register_module::<tarball::TarArchive>("build", "tar", Vec::new());
    registry.register_module::<upx::Upx>("build", "upx", Vec::new());
    registry.register_module::<changelog::Changelog>("build", "changelog", Vec::new());
    registry.register_module::<scp::Scp>("publish", "scp", Vec::new());
    registry.register_module::<release::ArtifactRelease>(
        "publish",
        "artifact",
        vec![ModuleKey::new("setup", "git")],
    );
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Runs `command` to completion, failing on a non-zero exit status.
pub(crate) fn run_command(command: &mut Command) -> Result<()> {
    debug!(command = ?command, "Running command");
    let status = command
        .status()
        .with_context(|| format!("Failed to start {:?}", command.get_program()))?;
    if !status.success() {
        bail!("{:?} exited with {}", command.get_program(), status);
    }
    Ok(())
}

/// Runs `command` and returns its trimmed standard output.
pub(crate) fn command_output(command: &mut Command) -> Result<String> {
    debug!(command = ?command, "Capturing command output");
    let output = command
        .output()
        .with_context(|| format!("Failed to start {:?}", command.get_program()))?;
    if !output.status.success() {
        bail!(
            "{:?} exited with {}: {}",
            command.get_program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
