//! Minimal GitHub releases client: find, create or update a release by tag
//! and upload assets to it.

use std::fs;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::Artifact;

pub const API_URL: &str = "https://api.github.com/";
pub const UPLOAD_URL: &str = "https://uploads.github.com/";

/// Body of a create or edit release call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseData {
    pub name: String,
    pub tag_name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

impl ReleaseData {
    /// Untagged builds become drafts named after the version. A tag with a
    /// semver pre-release part marks a pre-release.
    pub fn new(tag: &str, version: &str, name: &str, notes: &str) -> Self {
        let tag_name = if tag.is_empty() { version } else { tag };
        let prerelease = semver::Version::parse(tag_name)
            .map(|parsed| !parsed.pre.is_empty())
            .unwrap_or(false);
        Self {
            name: name.to_string(),
            tag_name: tag_name.to_string(),
            body: notes.to_string(),
            draft: tag.is_empty(),
            prerelease,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
}

pub struct GitHubClient {
    http: Client,
    api_url: String,
    upload_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    /// Builds the HTTP client used for GitHub calls.
    pub fn http_client(skip_tls_verify: bool) -> Result<Client> {
        Client::builder()
            .user_agent(format!("shipline/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .danger_accept_invalid_certs(skip_tls_verify)
            .build()
            .context("Failed to build HTTP client")
    }

    /// `base_url` selects a GitHub Enterprise host; empty means github.com.
    pub fn new(http: Client, base_url: &str, token: &str, owner: &str, repo: &str) -> Self {
        let (api_url, upload_url) = if base_url.is_empty() {
            (API_URL.to_string(), UPLOAD_URL.to_string())
        } else {
            let base = base_url.trim_end_matches('/');
            (format!("{base}/api/v3/"), format!("{base}/api/uploads/"))
        };
        Self {
            http,
            api_url,
            upload_url,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    fn releases_url(&self) -> String {
        format!("{}repos/{}/{}/releases", self.api_url, self.owner, self.repo)
    }

    pub fn release_by_tag(&self, tag: &str) -> Result<Option<ReleaseInfo>> {
        let url = format!("{}/tags/{tag}", self.releases_url());
        let response = self
            .request(Method::GET, &url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_response(response).map(Some)
    }

    pub fn create_release(&self, data: &ReleaseData) -> Result<ReleaseInfo> {
        let url = self.releases_url();
        let response = self
            .request(Method::POST, &url)
            .json(data)
            .send()
            .with_context(|| format!("POST {url}"))?;
        parse_response(response)
    }

    pub fn edit_release(&self, id: u64, data: &ReleaseData) -> Result<ReleaseInfo> {
        let url = format!("{}/{id}", self.releases_url());
        let response = self
            .request(Method::PATCH, &url)
            .json(data)
            .send()
            .with_context(|| format!("PATCH {url}"))?;
        parse_response(response)
    }

    /// Creates the release for `data.tag_name`, or updates the existing
    /// one while keeping its notes when they are not empty. Returns the
    /// release ID.
    pub fn publish(&self, mut data: ReleaseData) -> Result<u64> {
        match self.release_by_tag(&data.tag_name)? {
            None => {
                let created = self
                    .create_release(&data)
                    .with_context(|| format!("creating release {}", data.tag_name))?;
                info!(tag = data.tag_name.as_str(), id = created.id, "Release created");
                Ok(created.id)
            }
            Some(existing) => {
                if let Some(body) = existing.body.filter(|body| !body.is_empty()) {
                    data.body = body;
                }
                let edited = self
                    .edit_release(existing.id, &data)
                    .with_context(|| format!("updating release {}", data.tag_name))?;
                info!(tag = data.tag_name.as_str(), id = edited.id, "Release updated");
                Ok(edited.id)
            }
        }
    }

    pub fn upload_asset(&self, release_id: u64, artifact: &Artifact) -> Result<()> {
        let url = format!(
            "{}repos/{}/{}/releases/{release_id}/assets",
            self.upload_url, self.owner, self.repo
        );
        let content = fs::read(artifact.location())
            .with_context(|| format!("can't open file {}", artifact.location().display()))?;
        debug!(file = artifact.filename.as_str(), bytes = content.len(), "Uploading asset");

        let response = self
            .request(Method::POST, &url)
            .query(&[("name", artifact.filename.as_str())])
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .with_context(|| format!("POST {url}"))?;
        check_status(response)?;
        Ok(())
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    bail!("GitHub API error: HTTP {}: {}", status.as_u16(), body.trim());
}

fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    check_status(response)?
        .json()
        .context("Failed to parse GitHub response")
}
