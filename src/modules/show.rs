use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::registry::Module;

/// Logs the environment and every artifact recorded so far.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Show {}

impl Module for Show {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        info!("Environment:");
        for (key, value) in ctx.env.iter() {
            info!("- {key} = {value:?}");
        }

        info!("Artifacts:");
        for artifact in &ctx.artifacts {
            info!(
                "- {}: {} ({})",
                artifact.id,
                artifact.filename,
                artifact.os_arch_key()
            );
        }
        Ok(())
    }
}
