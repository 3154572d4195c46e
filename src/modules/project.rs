use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::registry::Module;

/// Records the project name and output directory.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Project {
    pub name: String,
    #[serde(rename = "target")]
    pub target_dir: PathBuf,
}

impl Default for Project {
    fn default() -> Self {
        let name = std::env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| ".".to_string());
        Self {
            name,
            target_dir: PathBuf::from("dist"),
        }
    }
}

impl Module for Project {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        fs::create_dir_all(&self.target_dir).with_context(|| {
            format!(
                "Failed to create target directory: {}",
                self.target_dir.display()
            )
        })?;
        ctx.project_name = self.name.clone();
        ctx.target_dir = self.target_dir.clone();
        info!(project = self.name.as_str(), target_dir = %self.target_dir.display(), "Project configured");
        Ok(())
    }
}
