use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use serde::Serialize;

use crate::artifact::Catalog;

/// Mutable state threaded through every module of a single pipeline run.
#[derive(Debug, Default)]
pub struct Context {
    pub project_name: String,
    pub version: String,
    pub target_dir: PathBuf,
    pub publish: bool,
    pub env: Env,
    pub git: GitData,
    pub artifacts: Catalog,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Repository metadata collected by the `setup:git` module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitData {
    /// Tag of the current commit, if it sits exactly on one.
    pub tag: String,
    /// Full commit hash of `HEAD`.
    pub reference: String,
    /// Upstream URL of the current branch.
    pub url: String,
}

/// Environment variables visible to modules, kept in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    pub fn has(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Imports variables, keeping any value that was set before the import.
    pub fn load<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.vars.entry(key.into()).or_insert_with(|| value.into());
        }
    }

    /// Replaces `$VAR` and `${VAR}` references. Undefined variables expand to
    /// an empty string.
    pub fn expand(&self, input: &str) -> String {
        shellexpand::env_with_context_no_errors(input, |key: &str| {
            Some(self.get(key).unwrap_or(""))
        })
        .into_owned()
    }

    /// Builds a process command that sees these variables on top of the
    /// inherited process environment.
    pub fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command.envs(&self.vars);
        command
    }
}
