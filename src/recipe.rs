use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yaml::Value;

use crate::pipeline::PipelineError;

/// Environment variable naming the pipeline document to use.
pub const CONFIG_ENV: &str = "SHIPLINE_CONFIG";
pub const DEFAULT_CONFIG: &str = ".shipline.yml";
pub const LOCAL_CONFIG: &str = ".shipline.local.yml";

/// A parsed declarative pipeline document.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub path: Option<PathBuf>,
    pub document: Value,
}

impl Recipe {
    /// Picks the document to load: an explicit path, then `SHIPLINE_CONFIG`,
    /// then a local override file, then the default file name.
    pub fn detect_path(explicit: Option<&Path>) -> PathBuf {
        Self::detect_path_in(
            explicit,
            std::env::var(CONFIG_ENV).ok().as_deref(),
            Path::new("."),
        )
    }

    pub fn detect_path_in(explicit: Option<&Path>, from_env: Option<&str>, dir: &Path) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = from_env.filter(|value| !value.is_empty()) {
            return PathBuf::from(path);
        }
        let local = dir.join(LOCAL_CONFIG);
        if local.is_file() {
            return local;
        }
        dir.join(DEFAULT_CONFIG)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        let mut recipe = Self::parse(&content)
            .with_context(|| format!("Failed to parse pipeline file: {}", path.display()))?;
        recipe.path = Some(path.to_path_buf());
        Ok(recipe)
    }

    pub fn parse(content: &str) -> Result<Self, PipelineError> {
        let document: Value = serde_yaml::from_str(content).map_err(PipelineError::Parse)?;
        Ok(Self {
            path: None,
            document,
        })
    }

    /// Top-level section labels, in document order.
    pub fn sections(&self) -> Vec<&str> {
        match &self.document {
            Value::Mapping(map) => map.keys().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_path_wins() {
        let temp = tempdir().unwrap();
        let path = Recipe::detect_path_in(Some(Path::new("a.yml")), Some("b.yml"), temp.path());
        assert_eq!(path, PathBuf::from("a.yml"));
    }

    #[test]
    fn env_beats_files() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG), "---\n").unwrap();
        let path = Recipe::detect_path_in(None, Some("b.yml"), temp.path());
        assert_eq!(path, PathBuf::from("b.yml"));
    }

    #[test]
    fn local_file_used_when_present() {
        let temp = tempdir().unwrap();
        assert_eq!(
            Recipe::detect_path_in(None, None, temp.path()),
            temp.path().join(DEFAULT_CONFIG)
        );
        std::fs::write(temp.path().join(LOCAL_CONFIG), "---\n").unwrap();
        assert_eq!(
            Recipe::detect_path_in(None, None, temp.path()),
            temp.path().join(LOCAL_CONFIG)
        );
    }

    #[test]
    fn empty_document_parses() {
        let recipe = Recipe::parse("---\n").unwrap();
        assert!(recipe.sections().is_empty());
    }
}
