use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact::{Artifact, OsArch};
use crate::context::Context;
use crate::modules::ensure_parent;
use crate::registry::Module;
use crate::template::TemplateData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Deflate,
    Store,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Deflate => CompressionMethod::Deflated,
            Compression::Store => CompressionMethod::Stored,
        }
    }
}

/// Packs the artifacts of earlier builds into one zip file per OS-arch
/// target, together with a set of static files.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZipArchive {
    pub builds: Vec<String>,
    /// Directory every entry is placed under. Empty means the archive root.
    pub common_dir: String,
    pub compression: Compression,
    /// Glob patterns, relative to the working directory.
    pub files: Vec<String>,
    pub id: String,
    pub output: String,
    pub skip: Vec<String>,
}

impl Default for ZipArchive {
    fn default() -> Self {
        Self {
            builds: vec!["default".into()],
            common_dir: "{{ProjectName}}-{{Version}}-{{OS}}-{{ArchName}}".into(),
            compression: Compression::default(),
            files: vec!["README*".into()],
            id: "archive".into(),
            output: "{{ProjectName}}-{{Version}}-{{OS}}-{{ArchName}}{{Ext}}".into(),
            skip: Vec::new(),
        }
    }
}

/// One archive to write: the rendered names plus the artifacts of a target.
pub(crate) struct ArchiveTarget<'a> {
    pub os_arch: Option<OsArch>,
    pub common_dir: String,
    pub output: String,
    pub artifacts: &'a [Artifact],
}

impl<'a> ArchiveTarget<'a> {
    pub fn render(
        module: &str,
        ctx: &Context,
        artifacts: &'a [Artifact],
        ext: &str,
        common_dir: &str,
        output: &str,
    ) -> Result<Self> {
        let os_arch = artifacts.first().and_then(Artifact::os_arch);
        let mut data = TemplateData::from_context(ctx);
        if let Some(target) = &os_arch {
            data.set_target(target);
        }
        data.ext = ext.into();

        let rendered_dir = data
            .render(module, common_dir)
            .with_context(|| format!("rendering {common_dir:?}"))?;
        let rendered_output = data
            .render(module, output)
            .with_context(|| format!("rendering {output:?}"))?;

        Ok(Self {
            os_arch,
            common_dir: rendered_dir.trim_matches('/').to_string(),
            output: rendered_output,
            artifacts,
        })
    }

    pub fn entry_name(&self, name: &str) -> String {
        let name = name.trim_start_matches("./").trim_start_matches('/');
        if self.common_dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.common_dir, name)
        }
    }

    /// Every `(entry name, source)` pair, artifacts first.
    pub fn entries(&self, files: &[PathBuf]) -> Vec<(String, PathBuf)> {
        let artifacts = self
            .artifacts
            .iter()
            .map(|artifact| (self.entry_name(&artifact.filename), artifact.location().to_path_buf()));
        let statics = files
            .iter()
            .map(|path| (self.entry_name(&path.to_string_lossy().replace('\\', "/")), path.clone()));
        artifacts.chain(statics).collect()
    }

    pub fn into_artifact(self, id: &str, location: PathBuf) -> Artifact {
        let artifact = Artifact::new(id, &self.output, location);
        match &self.os_arch {
            Some(os_arch) => artifact.with_target(os_arch),
            None => artifact,
        }
    }
}

/// Parent directories of an entry that were not seen yet, outermost first,
/// each with a trailing slash.
pub(crate) fn new_parent_dirs(seen: &mut HashSet<String>, entry: &str) -> Vec<String> {
    let mut prefix = String::new();
    let mut created = Vec::new();
    let parts: Vec<&str> = entry.split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        prefix.push_str(part);
        prefix.push('/');
        if seen.insert(prefix.clone()) {
            created.push(prefix.clone());
        }
    }
    created
}

/// Expands glob patterns into the regular files they match.
pub(crate) fn static_files(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let entries =
            glob::glob(pattern).with_context(|| format!("invalid glob pattern {pattern:?}"))?;
        for entry in entries {
            let path = entry.with_context(|| format!("reading matches of {pattern:?}"))?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}

impl ZipArchive {
    fn write(&self, target: &ArchiveTarget<'_>, location: &Path, files: &[PathBuf]) -> Result<()> {
        ensure_parent(location)?;
        let file = File::create(location)
            .with_context(|| format!("cannot create archive file {}", location.display()))?;
        let options = FileOptions::default().compression_method(self.compression.method());
        let mut zip = ZipWriter::new(file);
        let mut dirs = HashSet::new();

        for (entry, source) in target.entries(files) {
            for dir in new_parent_dirs(&mut dirs, &entry) {
                zip.add_directory(dir.as_str(), options)
                    .with_context(|| format!("cannot create directory {dir}"))?;
            }
            let mut reader = File::open(&source)
                .with_context(|| format!("can't open file {}", source.display()))?;
            zip.start_file(entry.as_str(), options)
                .with_context(|| format!("cannot add entry {entry}"))?;
            io::copy(&mut reader, &mut zip)
                .with_context(|| format!("copying {} to archive {entry}", source.display()))?;
        }

        zip.finish()
            .with_context(|| format!("finishing {}", location.display()))?;
        Ok(())
    }
}

impl Module for ZipArchive {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        groups.validate_rectangular()?;
        let files = static_files(&self.files)?;

        let mut produced = Vec::new();
        for (key, artifacts) in groups.iter() {
            let target = ArchiveTarget::render(
                "build:zip",
                ctx,
                artifacts,
                ".zip",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn target(common_dir: &str) -> ArchiveTarget<'static> {
        ArchiveTarget {
            os_arch: None,
            common_dir: common_dir.into(),
            output: "out.zip".into(),
            artifacts: &[],
        }
    }

    #[test]
    fn entry_names_are_prefixed_with_common_dir() {
        assert_eq!(
            target("demo-1.0-linux-amd64").entry_name("./README.md"),
            "demo-1.0-linux-amd64/README.md"
        );
        assert_eq!(target("").entry_name("/demo"), "demo");
    }

    #[test]
    fn parent_dirs_are_created_once() {
        let mut seen = HashSet::new();
        assert_eq!(
            new_parent_dirs(&mut seen, "demo/docs/README.md"),
            vec!["demo/", "demo/docs/"]
        );
        assert_eq!(new_parent_dirs(&mut seen, "demo/docs/LICENSE"), Vec::<String>::new());
        assert_eq!(new_parent_dirs(&mut seen, "demo/bin"), Vec::<String>::new());
    }

    #[test]
    fn compression_names_parse() {
        let compression: Compression = serde_yaml::from_str("store").unwrap();
        assert_eq!(compression, Compression::Store);
    }
}
