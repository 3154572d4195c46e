//! Placeholder rendering for configuration strings.
//!
//! Templates reference values with `{{Name}}` (a leading dot, `{{.Name}}`, is
//! accepted as well). After placeholders are substituted the result goes
//! through environment expansion, so `$VAR` and `${VAR}` work in every
//! rendered field.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::artifact::OsArch;
use crate::context::{Context, Env, GitData};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*\}\}")
        .expect("placeholder pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {name}: malformed placeholder at offset {offset}")]
    Malformed { name: String, offset: usize },

    #[error("template {name}: unknown field {field:?}")]
    UnknownField { name: String, field: String },
}

/// Values available to templates. Modules fill in the target-specific
/// fields (`os`, `arch`, `ext`, `algo`) before rendering.
#[derive(Debug, Clone)]
pub struct TemplateData<'a> {
    pub project_name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub arm_version: Option<u32>,
    pub ext: String,
    pub algo: String,
    pub archive_name: String,
    pub git: &'a GitData,
    pub env: &'a Env,
}

impl<'a> TemplateData<'a> {
    pub fn new(env: &'a Env, git: &'a GitData) -> Self {
        Self {
            project_name: String::new(),
            version: String::new(),
            os: String::new(),
            arch: String::new(),
            arm_version: None,
            ext: String::new(),
            algo: String::new(),
            archive_name: String::new(),
            git,
            env,
        }
    }

    pub fn from_context(ctx: &'a Context) -> Self {
        let mut data = Self::new(&ctx.env, &ctx.git);
        data.project_name = ctx.project_name.clone();
        data.version = ctx.version.clone();
        data
    }

    pub fn set_target(&mut self, target: &OsArch) {
        self.os = target.os.clone();
        self.arch = target.arch.clone();
        self.arm_version = target.arm_version;
    }

    pub fn arch_name(&self) -> String {
        OsArch {
            os: self.os.clone(),
            arch: self.arch.clone(),
            arm_version: self.arm_version,
        }
        .arch_name()
    }

    pub fn render(&self, name: &str, text: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for captures in PLACEHOLDER.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            push_literal(&mut out, text, cursor, whole.start(), name)?;
            let field = &captures[1];
            let value = self
                .lookup(field)
                .ok_or_else(|| TemplateError::UnknownField {
                    name: name.to_string(),
                    field: field.to_string(),
                })?;
            out.push_str(&value);
            cursor = whole.end();
        }
        push_literal(&mut out, text, cursor, text.len(), name)?;

        Ok(self.env.expand(&out))
    }

    fn lookup(&self, field: &str) -> Option<String> {
        if let Some(var) = field.strip_prefix("Env.") {
            return Some(self.env.get(var).unwrap_or_default().to_string());
        }
        let value = match field {
            "ProjectName" => self.project_name.clone(),
            "Version" => self.version.clone(),
            "OS" => self.os.clone(),
            "Arch" => self.arch.clone(),
            "ArchName" => self.arch_name(),
            "ArmVersion" => self
                .arm_version
                .map(|version| version.to_string())
                .unwrap_or_default(),
            "Ext" => self.ext.clone(),
            "Algo" => self.algo.clone(),
            "ArchiveName" => self.archive_name.clone(),
            "Git.Tag" => self.git.tag.clone(),
            "Git.Ref" => self.git.reference.clone(),
            "Git.URL" => self.git.url.clone(),
            _ => return None,
        };
        Some(value)
    }
}

fn push_literal(
    out: &mut String,
    text: &str,
    start: usize,
    end: usize,
    name: &str,
) -> Result<(), TemplateError> {
    let literal = &text[start..end];
    if let Some(pos) = literal.find("{{") {
        return Err(TemplateError::Malformed {
            name: name.to_string(),
            offset: start + pos,
        });
    }
    out.push_str(literal);
    Ok(())
}
