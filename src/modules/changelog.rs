use std::fs;

use anyhow::{Context as _, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::Artifact;
use crate::context::Context;
use crate::modules::ensure_parent;
use crate::registry::Module;

static SPLIT_LINKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^## \[.+?\][^:]").expect("split link pattern is valid"));
static LINK_DEFINITIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\[(.+?)\]:\s*(.+)$").expect("link pattern is valid"));
static DOUBLE_LINKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\[[^\]\n]+\]\([^)\n]+\))\([^)\n]+\)").expect("double link pattern is valid")
});

/// Cuts the section of a keepachangelog file that matches the current tag
/// (or `Unreleased` when there is none) and records it as an artifact.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Changelog {
    pub id: String,
    pub input: String,
    /// File name under the target directory. Defaults to the input name.
    pub output: String,
}

impl Default for Changelog {
    fn default() -> Self {
        Self {
            id: "changelog".into(),
            input: "CHANGELOG.md".into(),
            output: String::new(),
        }
    }
}

/// Returns the section headed `## [version]`, with reference-style links
/// turned into inline links.
pub fn cut_section(contents: &str, version: &str) -> Option<String> {
    let pattern = format!(
        r"(?ms)^(## \[(?i:{})\].+?)(?:\n## |\n\[[^\]\n]+\]:|\z)",
        regex::escape(version)
    );
    let section = Regex::new(&pattern).ok()?.captures(contents)?.get(1)?;
    let mut section = section.as_str().trim_end().to_string();

    if SPLIT_LINKS.is_match(&section) {
        for link in LINK_DEFINITIONS.captures_iter(contents) {
            section = section.replace(
                &format!("[{}]", &link[1]),
                &format!("[{}]({})", &link[1], link[2].trim()),
            );
        }
    }

    let mut section = DOUBLE_LINKS.replace_all(&section, "$1").into_owned();
    section.push('\n');
    Some(section)
}

impl Module for Changelog {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let contents = fs::read_to_string(&self.input)
            .with_context(|| format!("reading original CHANGELOG {}", self.input))?;

        let version = if ctx.git.tag.is_empty() {
            "unreleased"
        } else {
            ctx.git.tag.as_str()
        };
        let section = cut_section(&contents, version)
            .ok_or_else(|| anyhow!("cannot detect changelog segment for {version}"))?;

        let output = if self.output.is_empty() {
            &self.input
        } else {
            &self.output
        };
        let location = ctx.target_dir.join(output);
        ensure_parent(&location)?;
        fs::write(&location, section)
            .with_context(|| format!("writing sliced CHANGELOG {}", location.display()))?;

        info!(version, file = %location.display(), "Changelog section written");
        ctx.artifacts
            .add(Artifact::new(&self.id, &self.input, location));
        Ok(())
    }
}
