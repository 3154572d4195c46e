use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::Context;
use crate::modules::run_command;
use crate::registry::Module;

/// Uploads artifacts to a remote host with `scp`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scp {
    pub builds: Vec<String>,
    pub skip: Vec<String>,
    /// Last argument of `scp`, e.g. `files@example.com:/var/www/releases`.
    pub target: String,
}

impl Default for Scp {
    fn default() -> Self {
        Self {
            builds: vec!["archive".into()],
            skip: Vec::new(),
            target: String::new(),
        }
    }
}

impl Scp {
    pub fn arguments(&self, ctx: &Context) -> Vec<String> {
        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        let mut args: Vec<String> = groups
            .artifacts()
            .map(|artifact| artifact.location().to_string_lossy().to_string())
            .collect();
        args.push(ctx.env.expand(&self.target));
        args
    }
}

impl Module for Scp {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        if self.target.is_empty() {
            bail!("scp target is not set");
        }
        let args = self.arguments(ctx);
        if args.len() == 1 {
            warn!(builds = ?self.builds, "No artifacts to upload");
            return Ok(());
        }

        info!(files = args.len() - 1, destination = self.target.as_str(), "Uploading artifacts");
        run_command(ctx.env.command("scp").args(&args))
    }
}
