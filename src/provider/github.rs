//! GitHub provider
//!
//! REST client against api.github.com. GitHub organizations cannot be created
//! through the API, so `ensure_organization` only verifies the org exists,
//! and `ensure_token` hands back the configured PAT: personal access tokens
//! cannot be minted over REST either.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::{classify_status, transport_error, GitProvider, OrgRef, ProviderCredentials, RepoRef};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("adhar-platform-controller/", env!("CARGO_PKG_VERSION"));

pub struct Github {
    http: reqwest::Client,
    git_url: String,
    credentials: ProviderCredentials,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    clone_url: String,
}

impl Github {
    pub fn new(git_url: &str, credentials: ProviderCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            git_url: git_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("user-agent", USER_AGENT)
            .header("accept", "application/vnd.github+json")
            .bearer_auth(&self.credentials.password)
    }
}

#[async_trait]
impl GitProvider for Github {
    async fn ensure_organization(&self, name: &str) -> Result<OrgRef> {
        let get = self
            .authed(self.http.get(format!("{API_BASE}/orgs/{name}")))
            .send()
            .await
            .map_err(|e| transport_error(e, "get organization"))?;
        if get.status().is_success() {
            debug!(org = name, "organization exists");
            return Ok(OrgRef {
                name: name.to_string(),
            });
        }
        if get.status() == reqwest::StatusCode::NOT_FOUND {
            // Orgs must be provisioned out of band on GitHub.
            return Err(Error::Validation(format!(
                "GitHub organization {name} does not exist and cannot be created via the API"
            )));
        }
        Err(classify_status(get.status(), "get organization"))
    }

    async fn ensure_repository(&self, org: &str, name: &str) -> Result<RepoRef> {
        let get = self
            .authed(self.http.get(format!("{API_BASE}/repos/{org}/{name}")))
            .send()
            .await
            .map_err(|e| transport_error(e, "get repository"))?;
        if get.status().is_success() {
            let repo: GithubRepo = get
                .json()
                .await
                .map_err(|e| transport_error(e, "decode repository"))?;
            return Ok(RepoRef {
                organization: org.to_string(),
                name: name.to_string(),
                clone_url: repo.clone_url,
            });
        }
        if get.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(classify_status(get.status(), "get repository"));
        }

        let create = self
            .authed(self.http.post(format!("{API_BASE}/orgs/{org}/repos")))
            .json(&json!({ "name": name, "auto_init": true, "private": false }))
            .send()
            .await
            .map_err(|e| transport_error(e, "create repository"))?;
        match create.status() {
            s if s.is_success() => {
                let repo: GithubRepo = create
                    .json()
                    .await
                    .map_err(|e| transport_error(e, "decode repository"))?;
                info!(org, repo = name, "created repository");
                Ok(RepoRef {
                    organization: org.to_string(),
                    name: name.to_string(),
                    clone_url: repo.clone_url,
                })
            }
            // 422 with "name already exists" when racing a concurrent reconcile
            reqwest::StatusCode::UNPROCESSABLE_ENTITY => Ok(RepoRef {
                organization: org.to_string(),
                name: name.to_string(),
                clone_url: self.clone_url(org, name, false),
            }),
            s => Err(classify_status(s, "create repository")),
        }
    }

    async fn ensure_token(&self, _user: &str, _token_name: &str) -> Result<String> {
        // PATs cannot be rotated via the REST API; the configured credential
        // is the token.
        Ok(self.credentials.password.clone())
    }

    fn clone_url(&self, org: &str, repo: &str, _internal: bool) -> String {
        // GitHub has no cluster-local form.
        format!("{}/{org}/{repo}.git", self.git_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_ignores_internal_flag() {
        let g = Github::new(
            "https://github.com",
            ProviderCredentials {
                username: "adhar-bot".into(),
                password: "ghp_test".into(),
            },
        );
        assert_eq!(
            g.clone_url("adhar-io", "packages", true),
            "https://github.com/adhar-io/packages.git"
        );
        assert_eq!(
            g.clone_url("adhar-io", "packages", false),
            "https://github.com/adhar-io/packages.git"
        );
    }
}
