use std::fs;

use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::{Context, Env};
use crate::modules::github::{GitHubClient, ReleaseData};
use crate::registry::Module;
use crate::template::TemplateData;

/// Release hosting service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    #[default]
    #[serde(rename = "github", alias = "GitHub", alias = "Github")]
    GitHub,
}

impl Storage {
    fn default_token_env(self) -> &'static str {
        match self {
            Storage::GitHub => "GITHUB_TOKEN",
        }
    }

    fn default_token_file(self) -> &'static str {
        match self {
            Storage::GitHub => "$XDG_CONFIG_HOME/shipline/github_token",
        }
    }
}

/// Publishes a release with the selected artifacts attached.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactRelease {
    pub builds: Vec<String>,
    pub skip: Vec<String>,
    /// Repository name.
    pub name: String,
    pub owner: String,
    pub release_name: String,
    /// Artifact ID of the release notes file, e.g. from `build:changelog`.
    pub release_notes: String,
    pub skip_tls_verify: bool,
    pub storage: Storage,
    pub token_env: String,
    pub token_file: String,
    /// Base URL of a self-hosted instance.
    pub url: String,
}

impl Default for ArtifactRelease {
    fn default() -> Self {
        Self {
            builds: vec!["archive".into()],
            skip: Vec::new(),
            name: String::new(),
            owner: String::new(),
            release_name: "{{Version}}".into(),
            release_notes: "changelog".into(),
            skip_tls_verify: false,
            storage: Storage::default(),
            token_env: String::new(),
            token_file: String::new(),
            url: String::new(),
        }
    }
}

impl ArtifactRelease {
    /// Looks the token up in the configured variable, the storage's default
    /// variable, the configured file and the storage's default file, in
    /// that order.
    pub fn token(&self, env: &Env) -> Result<String> {
        for var in [self.token_env.as_str(), self.storage.default_token_env()] {
            if let Some(token) = env.get(var)
                && !var.is_empty()
                && !token.is_empty()
            {
                debug!(var, "Using token from environment");
                return Ok(token.to_string());
            }
        }

        for file in [self.token_file.as_str(), self.storage.default_token_file()] {
            if file.is_empty() {
                continue;
            }
            let path = env.expand(file);
            match fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    debug!(path = path.as_str(), "Using token from file");
                    return Ok(content.trim().to_string());
                }
                Ok(_) => debug!(path = path.as_str(), "Token file is empty"),
                Err(err) => debug!(path = path.as_str(), error = %err, "Token file not readable"),
            }
        }

        bail!(
            "no release token found: set {} or write it to {}",
            self.storage.default_token_env(),
            self.storage.default_token_file()
        )
    }

    /// Reads the single release notes artifact.
    pub fn release_notes(&self, ctx: &Context) -> Result<String> {
        let notes = ctx.artifacts.by_id(&self.release_notes);
        let artifact = match notes.as_slice() {
            [] => bail!("release notes not found"),
            [artifact] => artifact,
            _ => bail!("multiple release notes found"),
        };
        fs::read_to_string(artifact.location())
            .with_context(|| format!("reading release notes {}", artifact.location().display()))
    }

    /// Publishes through `client`; `run` builds the client from the
    /// module settings.
    pub fn publish_with(&self, ctx: &Context, client: &GitHubClient) -> Result<()> {
        let notes = self.release_notes(ctx)?;
        let release_name = TemplateData::from_context(ctx)
            .render("publish:artifact", &self.release_name)
            .with_context(|| format!("rendering {:?}", self.release_name))?;

        let data = ReleaseData::new(&ctx.git.tag, &ctx.version, &release_name, &notes);
        let release_id = client.publish(data)?;

        let groups = ctx.artifacts.group_by_os_arch(&self.builds, &self.skip);
        for artifact in groups.artifacts() {
            client.upload_asset(release_id, artifact).with_context(|| {
                format!(
                    "uploading file {} to release {}/{} #{release_id}",
                    artifact.filename, self.owner, self.name
                )
            })?;
            info!(file = artifact.filename.as_str(), "Asset uploaded");
        }
        Ok(())
    }
}

impl Module for ArtifactRelease {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        if self.owner.is_empty() || self.name.is_empty() {
            bail!("release repository is not set: owner and name are required");
        }
        // Fail on missing notes before asking for credentials.
        self.release_notes(ctx)?;
        let token = self.token(&ctx.env)?;

        let http = GitHubClient::http_client(self.skip_tls_verify)?;
        let client = GitHubClient::new(http, &self.url, &token, &self.owner, &self.name);
        info!(owner = self.owner.as_str(), repo = self.name.as_str(), "Publishing release");
        self.publish_with(ctx, &client)
    }
}
