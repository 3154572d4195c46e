use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::{Artifact, OsArch};
use crate::context::Context;
use crate::modules::{ensure_parent, run_command};
use crate::registry::Module;
use crate::template::TemplateData;

/// Cross-compiles a Go program for every `goos` x `goarch` combination.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoBuild {
    /// Commands run before any target is built.
    pub before: Vec<String>,
    /// Commands run after every target is built.
    pub after: Vec<String>,
    pub goos: Vec<String>,
    pub goarch: Vec<String>,
    /// ARM revisions, used only for `linux`/`arm`.
    pub goarm: Vec<u32>,
    /// Artifact ID later modules refer to.
    pub id: String,
    pub ldflags: String,
    pub main: String,
    pub output: String,
    /// OS-arch keys to leave out, e.g. `linux-386`.
    pub skip: Vec<String>,
}

impl Default for GoBuild {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
            goos: vec!["linux".into(), "windows".into()],
            goarch: vec!["amd64".into()],
            goarm: vec![6],
            id: "default".into(),
            ldflags: "-s -w -X main.version={{Version}}".into(),
            main: ".".into(),
            output: "{{ProjectName}}{{Ext}}".into(),
            skip: Vec::new(),
        }
    }
}

/// A single resolved build of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoTarget {
    pub os_arch: OsArch,
    pub ldflags: String,
    pub out_dir: PathBuf,
    pub output: String,
}

impl GoTarget {
    pub fn location(&self) -> PathBuf {
        self.out_dir.join(&self.output)
    }
}

impl GoBuild {
    /// Expands the build matrix and renders per-target settings.
    pub fn targets(&self, ctx: &Context) -> Result<Vec<GoTarget>> {
        let mut targets = Vec::new();

        for goos in &self.goos {
            for goarch in &self.goarch {
                let arms: Vec<Option<u32>> = if goos == "linux" && goarch == "arm" {
                    self.goarm.iter().copied().map(Some).collect()
                } else {
                    vec![None]
                };

                for arm in arms {
                    let mut os_arch = OsArch::new(goos.as_str(), goarch.as_str());
                    os_arch.arm_version = arm;
                    if self.skip.contains(&os_arch.to_string()) {
                        continue;
                    }
                    targets.push(self.target(ctx, os_arch)?);
                }
            }
        }

        Ok(targets)
    }

    fn target(&self, ctx: &Context, os_arch: OsArch) -> Result<GoTarget> {
        let mut data = TemplateData::from_context(ctx);
        data.set_target(&os_arch);
        if os_arch.os == "windows" {
            data.ext = ".exe".into();
        }

        let ldflags = data
            .render("build:go", &self.ldflags)
            .context("cannot render ldflags")?;
        let out_dir = data
            .render("build:go", "{{ProjectName}}-{{OS}}-{{ArchName}}")
            .context("cannot render location")?;
        let output = data
            .render("build:go", &self.output)
            .context("cannot render output")?;

        Ok(GoTarget {
            os_arch,
            ldflags,
            out_dir: ctx.target_dir.join(out_dir),
            output,
        })
    }

    fn run_hooks(&self, ctx: &Context, hooks: &[String]) -> Result<()> {
        for hook in hooks {
            let mut args = hook.split_whitespace();
            let Some(program) = args.next() else {
                continue;
            };
            run_command(ctx.env.command(program).args(args))
                .with_context(|| format!("hook failed: {hook}"))?;
        }
        Ok(())
    }

    fn build(&self, ctx: &Context, target: &GoTarget) -> Result<()> {
        let location = target.location();
        ensure_parent(&location)?;

        let mut command = ctx.env.command("go");
        command
            .env("GOOS", &target.os_arch.os)
            .env("GOARCH", &target.os_arch.arch)
            .arg("build")
            .arg("-o")
            .arg(&location)
            .arg("-ldflags")
            .arg(&target.ldflags)
            .arg(&self.main);
        if let Some(arm) = target.os_arch.arm_version {
            command.env("GOARM", arm.to_string());
        }

        if let Err(err) = run_command(&mut command) {
            if let Err(remove_err) = fs::remove_file(&location)
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                debug!(
                    location = %location.display(),
                    error = %remove_err,
                    "Cannot remove partial build output"
                );
            }
            bail!("building {}: {err:#}", target.os_arch);
        }
        Ok(())
    }
}

impl Module for GoBuild {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let targets = self.targets(ctx)?;
        self.run_hooks(ctx, &self.before)?;

        for target in &targets {
            self.build(ctx, target)?;
            info!(os_arch = %target.os_arch, output = %target.location().display(), "Build finished");
            ctx.artifacts.add(
                Artifact::new(&self.id, &target.output, target.location()).with_target(&target.os_arch),
            );
        }

        self.run_hooks(ctx, &self.after)
    }
}
