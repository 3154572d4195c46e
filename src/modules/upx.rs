use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::ArtifactFormat;
use crate::context::Context;
use crate::modules::run_command;
use crate::registry::Module;

/// Compresses built executables in place with `upx`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Upx {
    pub builds: Vec<String>,
    pub skip: Vec<String>,
    /// Extra flags passed before the file list, e.g. `--best`.
    pub args: Vec<String>,
    /// Name or path of the `upx` executable.
    pub program: String,
}

impl Default for Upx {
    fn default() -> Self {
        Self {
            builds: vec!["default".into()],
            skip: Vec::new(),
            args: Vec::new(),
            program: "upx".into(),
        }
    }
}

impl Upx {
    pub fn arguments(&self, ctx: &Context) -> Vec<String> {
        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        self.args
            .iter()
            .cloned()
            .chain(
                groups
                    .artifacts()
                    .map(|artifact| artifact.location().to_string_lossy().to_string()),
            )
            .collect()
    }
}

impl Module for Upx {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let args = self.arguments(ctx);
        let files = args.len() - self.args.len();
        if files == 0 {
            info!(builds = ?self.builds, "No executables to compress");
            return Ok(());
        }

        info!(files, "Compressing executables");
        run_command(ctx.env.command(&self.program).args(&args))
            .with_context(|| format!("compressing with {}", self.program))?;
        ctx.artifacts
            .set_format(&self.builds, &self.skip, ArtifactFormat::Upx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, OsArch};

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.artifacts.add(
            Artifact::new("default", "demo", "dist/linux/demo")
                .with_target(&OsArch::new("linux", "amd64")),
        );
        ctx.artifacts.add(
            Artifact::new("default", "demo.exe", "dist/windows/demo.exe")
                .with_target(&OsArch::new("windows", "amd64")),
        );
        ctx.artifacts
            .add(Artifact::new("checksum", "sums.txt", "dist/sums.txt"));
        ctx
    }

    #[test]
    fn arguments_are_flags_then_selected_files() {
        let upx = Upx {
            skip: vec!["windows-amd64".into()],
            args: vec!["--best".into()],
            ..Upx::default()
        };
        assert_eq!(upx.arguments(&context()), vec!["--best", "dist/linux/demo"]);
    }

    #[test]
    fn nothing_selected_is_a_no_op() {
        let mut ctx = context();
        let upx = Upx {
            builds: vec!["missing".into()],
            program: "does-not-exist-upx".into(),
            ..Upx::default()
        };

        upx.run(&mut ctx).unwrap();

        assert!(ctx.artifacts.iter().all(|a| a.format == ArtifactFormat::Raw));
    }

    #[cfg(unix)]
    #[test]
    fn compressed_artifacts_change_format() {
        let mut ctx = context();
        let upx = Upx {
            skip: vec!["windows-amd64".into()],
            program: "true".into(),
            ..Upx::default()
        };

        upx.run(&mut ctx).unwrap();

        let formats: Vec<(&str, ArtifactFormat)> = ctx
            .artifacts
            .iter()
            .map(|a| (a.filename.as_str(), a.format))
            .collect();
        assert_eq!(
            formats,
            vec![
                ("demo", ArtifactFormat::Upx),
                ("demo.exe", ArtifactFormat::Raw),
                ("sums.txt", ArtifactFormat::Raw),
            ]
        );
    }

    #[test]
    fn missing_binary_fails() {
        let mut ctx = context();
        let upx = Upx {
            program: "does-not-exist-upx".into(),
            ..Upx::default()
        };

        let err = upx.run(&mut ctx).unwrap_err();

        assert_eq!(err.to_string(), "compressing with does-not-exist-upx");
        assert!(ctx.artifacts.iter().all(|a| a.format == ArtifactFormat::Raw));
    }
}
