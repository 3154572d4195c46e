use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tar::{Builder, EntryType, Header};
use tracing::info;

use crate::context::Context;
use crate::modules::archive::{ArchiveTarget, new_parent_dirs, static_files};
use crate::modules::ensure_parent;
use crate::registry::Module;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TarCompression {
    #[default]
    #[serde(rename = "none", alias = "", alias = "NONE")]
    None,
    #[serde(rename = "gzip", alias = "gz", alias = "GZip")]
    Gzip,
}

impl TarCompression {
    pub fn ext(self) -> &'static str {
        match self {
            TarCompression::None => "",
            TarCompression::Gzip => ".gz",
        }
    }
}

/// Packs the artifacts of earlier builds into one tarball per OS-arch
/// target, optionally gzip compressed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TarArchive {
    pub builds: Vec<String>,
    pub common_dir: String,
    pub compression: TarCompression,
    pub files: Vec<String>,
    pub id: String,
    /// `{{Ext}}` is `.gz` for gzip and empty otherwise.
    pub output: String,
    pub skip: Vec<String>,
}

impl Default for TarArchive {
    fn default() -> Self {
        Self {
            builds: vec!["default".into()],
            common_dir: "{{ProjectName}}-{{Version}}-{{OS}}-{{ArchName}}".into(),
            compression: TarCompression::default(),
            files: vec!["README*".into()],
            id: "archive".into(),
            output: "{{ProjectName}}-{{Version}}-{{OS}}-{{ArchName}}.tar{{Ext}}".into(),
            skip: Vec::new(),
        }
    }
}

fn append_entries<W: Write>(
    writer: W,
    target: &ArchiveTarget<'_>,
    files: &[PathBuf],
) -> Result<W> {
    let mut builder = Builder::new(writer);
    let mut dirs = HashSet::new();

    for (entry, source) in target.entries(files) {
        for dir in new_parent_dirs(&mut dirs, &entry) {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, &dir, io::empty())
                .with_context(|| format!("cannot create directory {dir}"))?;
        }
        builder
            .append_path_with_name(&source, &entry)
            .with_context(|| format!("copying {} to archive {entry}", source.display()))?;
    }

    builder.into_inner().context("finishing tar stream")
}

impl TarArchive {
    fn write(&self, target: &ArchiveTarget<'_>, location: &Path, files: &[PathBuf]) -> Result<()> {
        ensure_parent(location)?;
        let file = File::create(location)
            .with_context(|| format!("cannot create archive file {}", location.display()))?;

        match self.compression {
            TarCompression::None => {
                append_entries(file, target, files)?;
            }
            TarCompression::Gzip => {
                let encoder = GzEncoder::new(file, flate2::Compression::default());
                append_entries(encoder, target, files)?
                    .finish()
                    .context("finishing gzip stream")?;
            }
        }
        Ok(())
    }
}

impl Module for TarArchive {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        groups.validate_rectangular()?;
        let files = static_files(&self.files)?;

        let mut produced = Vec::new();
        for (key, artifacts) in groups.iter() {
            let target = ArchiveTarget::render(
                "build:tar",
                ctx,
                artifacts,
                self.compression.ext(),
                &self.common_dir,
                &self.output,
            )?;
            let location = ctx.target_dir.join(&target.output);
            self.write(&target, &location, &files)
                .with_context(|| format!("writing {}", location.display()))?;
            info!(os_arch = key, archive = %location.display(), "Archive written");
            produced.push(target.into_artifact(&self.id, location));
        }

        for artifact in produced {
            ctx.artifacts.add(artifact);
        }
        Ok(())
    }
}
