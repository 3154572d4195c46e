use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::context::Context;
use crate::modules::ensure_parent;
use crate::registry::Module;
use crate::template::TemplateData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of the file at `path`.
    pub fn digest_file(self, path: &Path) -> Result<String> {
        match self {
            HashAlgorithm::Sha224 => digest_file::<Sha224>(path),
            HashAlgorithm::Sha256 => digest_file::<Sha256>(path),
            HashAlgorithm::Sha384 => digest_file::<Sha384>(path),
            HashAlgorithm::Sha512 => digest_file::<Sha512>(path),
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {} for hashing", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

/// Writes a checksum listing of selected artifacts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Build IDs whose artifacts are hashed.
    pub builds: Vec<String>,
    pub id: String,
    pub output: String,
    pub skip: Vec<String>,
}

impl Default for Checksum {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            builds: vec!["archive".into()],
            id: "checksum".into(),
            output: "{{ProjectName}}-{{Version}}-checksums.txt".into(),
            skip: Vec::new(),
        }
    }
}

impl Module for Checksum {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let output = {
            let mut data = TemplateData::from_context(ctx);
            data.algo = self.algorithm.name().to_string();
            data.render("checksum", &self.output)
                .with_context(|| format!("rendering {:?}", self.output))?
        };
        let location = ctx.target_dir.join(&output);

        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        if groups.is_empty() {
            warn!(builds = ?self.builds, "No artifacts to checksum");
            return Ok(());
        }

        let mut lines = Vec::new();
        for artifact in groups.artifacts() {
            let digest = self.algorithm.digest_file(artifact.location())?;
            lines.push(format!("{digest}  {}", artifact.filename));
        }

        ensure_parent(&location)?;
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&location, content)
            .with_context(|| format!("Failed to write checksum file: {}", location.display()))?;

        info!(file = %location.display(), "Checksum file written");
        ctx.artifacts.add(Artifact::new(&self.id, output, location));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn sha256_matches_known_digest() {
        let temp = tempdir().unwrap();
        let file_path = temp.path().join("digest.bin");
        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"abc").unwrap();

        assert_eq!(
            HashAlgorithm::Sha256.digest_file(&file_path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
