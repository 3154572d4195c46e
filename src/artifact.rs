use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Grouping key used for artifacts that carry no target platform.
pub const NOARCH: &str = "noarch";

/// Target operating system and architecture of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OsArch {
    pub os: String,
    pub arch: String,
    pub arm_version: Option<u32>,
}

impl OsArch {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            arm_version: None,
        }
    }

    pub fn with_arm_version(mut self, version: u32) -> Self {
        self.arm_version = Some(version);
        self
    }

    /// Architecture name with the ARM revision appended, e.g. `armv7`.
    /// The suffix is only added for `arm` with a non-zero revision.
    pub fn arch_name(&self) -> String {
        match self.arm_version {
            Some(version) if self.arch == "arm" && version > 0 => {
                format!("{}v{}", self.arch, version)
            }
            _ => self.arch.clone(),
        }
    }
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch_name())
    }
}

/// How an artifact's bytes are packed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Raw,
    /// Executable compressed in place by `upx`.
    Upx,
}

/// A file produced by a module and recorded for later modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Logical build name, shared by every platform variant of a build.
    pub id: String,
    /// Name to use at the destination (inside an archive, on a release).
    pub filename: String,
    /// Where the producing module wrote the file.
    pub location: PathBuf,
    pub os: String,
    pub arch: String,
    pub arm_version: Option<u32>,
    pub format: ArtifactFormat,
}

impl Artifact {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            location: location.into(),
            os: String::new(),
            arch: String::new(),
            arm_version: None,
            format: ArtifactFormat::Raw,
        }
    }

    pub fn with_target(mut self, target: &OsArch) -> Self {
        self.os = target.os.clone();
        self.arch = target.arch.clone();
        self.arm_version = target.arm_version;
        self
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn os_arch(&self) -> Option<OsArch> {
        if self.os.is_empty() && self.arch.is_empty() {
            return None;
        }
        Some(OsArch {
            os: self.os.clone(),
            arch: self.arch.clone(),
            arm_version: self.arm_version,
        })
    }

    pub fn os_arch_key(&self) -> String {
        self.os_arch()
            .map(|target| target.to_string())
            .unwrap_or_else(|| NOARCH.to_string())
    }
}

/// Append-only ledger of artifacts, in production order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    artifacts: Vec<Artifact>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn by_id(&self, id: &str) -> Vec<&Artifact> {
        self.artifacts.iter().filter(|art| art.id == id).collect()
    }

    /// Changes the format of the selected artifacts, returning how many
    /// were updated.
    pub fn set_format<S: AsRef<str>>(&mut self, ids: &[S], skip: &[S], format: ArtifactFormat) -> usize {
        let mut updated = 0;
        for artifact in &mut self.artifacts {
            let selected = ids.iter().any(|id| id.as_ref() == artifact.id);
            let key = artifact.os_arch_key();
            if selected && !skip.iter().any(|skipped| skipped.as_ref() == key) {
                artifact.format = format;
                updated += 1;
            }
        }
        updated
    }

    /// Selects the artifacts of the requested builds and buckets them by
    /// OS-arch key, leaving out every key listed in `skip`.
    pub fn group_by_os_arch<S: AsRef<str>>(&self, ids: &[S], skip: &[S]) -> OsArchGroups {
        let skipped: HashSet<&str> = skip.iter().map(AsRef::as_ref).collect();
        let mut groups: BTreeMap<String, Vec<Artifact>> = BTreeMap::new();

        for id in ids {
            for artifact in self.by_id(id.as_ref()) {
                let key = artifact.os_arch_key();
                if skipped.contains(key.as_str()) {
                    continue;
                }
                groups.entry(key).or_default().push(artifact.clone());
            }
        }

        OsArchGroups {
            ids: ids.iter().map(|id| id.as_ref().to_string()).collect(),
            groups,
        }
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Artifact;
    type IntoIter = std::slice::Iter<'a, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.iter()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no targets found for {} {}", pluralize("build", .0.len()), .0.join(", "))]
    NoTargets(Vec<String>),

    #[error(
        "build {build} is missing os-arch {} {}",
        pluralize("target", .missing.len()),
        .missing.join(", ")
    )]
    MissingTargets { build: String, missing: Vec<String> },

    #[error("os-arch target {target} has {found} artifacts, {reference} has {expected}")]
    UnevenTargets {
        target: String,
        found: usize,
        reference: String,
        expected: usize,
    },
}

/// Artifacts of a set of builds, bucketed by OS-arch key.
#[derive(Debug, Clone, Default)]
pub struct OsArchGroups {
    ids: Vec<String>,
    groups: BTreeMap<String, Vec<Artifact>>,
}

impl OsArchGroups {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[Artifact]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Artifact])> {
        self.groups
            .iter()
            .map(|(key, artifacts)| (key.as_str(), artifacts.as_slice()))
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.groups.values().flatten()
    }

    /// Checks that every requested build covers the same OS-arch targets and
    /// that every target holds the same number of artifacts.
    ///
    /// The reference target set is the union of all keys present. A build
    /// with no artifacts at all reports every reference target; a build
    /// missing some reports only those. Targets are listed alphabetically.
    pub fn validate_rectangular(&self) -> Result<(), CatalogError> {
        if self.groups.is_empty() {
            return Ok(());
        }

        let reference: BTreeSet<&str> = self.keys().collect();
        let mut per_build: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (key, artifacts) in &self.groups {
            for artifact in artifacts {
                per_build
                    .entry(artifact.id.as_str())
                    .or_default()
                    .insert(key.as_str());
            }
        }

        let mut checked = HashSet::new();
        for id in &self.ids {
            if !checked.insert(id.as_str()) {
                continue;
            }
            let Some(found) = per_build.get(id.as_str()) else {
                return Err(CatalogError::NoTargets(
                    reference.iter().map(|key| key.to_string()).collect(),
                ));
            };
            let missing: Vec<String> = reference
                .difference(found)
                .map(|key| key.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(CatalogError::MissingTargets {
                    build: id.clone(),
                    missing,
                });
            }
        }

        let mut sizes = self.groups.iter().map(|(key, arts)| (key, arts.len()));
        if let Some((reference_key, expected)) = sizes.next() {
            for (key, found) in sizes {
                if found != expected {
                    return Err(CatalogError::UnevenTargets {
                        target: key.clone(),
                        found,
                        reference: reference_key.clone(),
                        expected,
                    });
                }
            }
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a OsArchGroups {
    type Item = (&'a String, &'a Vec<Artifact>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<Artifact>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
