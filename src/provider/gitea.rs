//! Gitea provider
//!
//! REST client against the Gitea v1 API using admin basic auth. Conflict
//! responses on create calls are resolved with a follow-up GET, so repeated
//! reconciles converge without a separate "already created" flag.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::Result;

use super::{classify_status, transport_error, GitProvider, OrgRef, ProviderCredentials, RepoRef};

pub struct Gitea {
    http: reqwest::Client,
    base_url: String,
    internal_url: Option<String>,
    credentials: ProviderCredentials,
}

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct GiteaToken {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedToken {
    sha1: String,
}

impl Gitea {
    pub fn new(
        base_url: &str,
        internal_url: Option<&str>,
        credentials: ProviderCredentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_url: internal_url.map(|u| u.trim_end_matches('/').to_string()),
            credentials,
        }
    }

    /// REST calls go over the cluster-local URL when one is configured; the
    /// ingress URL is not generally reachable from inside the cluster.
    fn api(&self, path: &str) -> String {
        let base = self.internal_url.as_deref().unwrap_or(&self.base_url);
        format!("{base}/api/v1{path}")
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }
}

#[async_trait]
impl GitProvider for Gitea {
    async fn ensure_organization(&self, name: &str) -> Result<OrgRef> {
        let get = self
            .authed(self.http.get(self.api(&format!("/orgs/{name}"))))
            .send()
            .await
            .map_err(|e| transport_error(e, "get organization"))?;
        if get.status().is_success() {
            debug!(org = name, "organization already exists");
            return Ok(OrgRef {
                name: name.to_string(),
            });
        }
        if get.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(classify_status(get.status(), "get organization"));
        }

        let create = self
            .authed(self.http.post(self.api("/orgs")))
            .json(&json!({ "username": name }))
            .send()
            .await
            .map_err(|e| transport_error(e, "create organization"))?;
        match create.status() {
            s if s.is_success() => {
                info!(org = name, "created organization");
                Ok(OrgRef {
                    name: name.to_string(),
                })
            }
            // Lost a race with a concurrent reconcile; the org exists now.
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::UNPROCESSABLE_ENTITY => {
                Ok(OrgRef {
                    name: name.to_string(),
                })
            }
            s => Err(classify_status(s, "create organization")),
        }
    }

    async fn ensure_repository(&self, org: &str, name: &str) -> Result<RepoRef> {
        let get = self
            .authed(self.http.get(self.api(&format!("/repos/{org}/{name}"))))
            .send()
            .await
            .map_err(|e| transport_error(e, "get repository"))?;
        if get.status().is_success() {
            let repo: GiteaRepo = get
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
            .authed(self.http.post(self.api(&format!("/orgs/{org}/repos"))))
            .json(&json!({
                "name": name,
                "auto_init": true,
                "default_branch": "main",
                "private": false,
            }))
            .send()
            .await
            .map_err(|e| transport_error(e, "create repository"))?;
        match create.status() {
            s if s.is_success() => {
                let repo: GiteaRepo = create
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
            reqwest::StatusCode::CONFLICT => Ok(RepoRef {
                organization: org.to_string(),
                name: name.to_string(),
                clone_url: self.clone_url(org, name, false),
            }),
            s => Err(classify_status(s, "create repository")),
        }
    }

    async fn ensure_token(&self, user: &str, token_name: &str) -> Result<String> {
        // List-delete-create: Gitea only returns the token value at creation
        // time, so a stale token with the same name must be rotated out.
        let list = self
            .authed(self.http.get(self.api(&format!("/users/{user}/tokens"))))
            .send()
            .await
            .map_err(|e| transport_error(e, "list tokens"))?;
        if !list.status().is_success() {
            return Err(classify_status(list.status(), "list tokens"));
        }
        let tokens: Vec<GiteaToken> = list
            .json()
            .await
            .map_err(|e| transport_error(e, "decode tokens"))?;

        for token in tokens.iter().filter(|t| t.name == token_name) {
            let delete = self
                .authed(
                    self.http
                        .delete(self.api(&format!("/users/{user}/tokens/{}", token.id))),
                )
                .send()
                .await
                .map_err(|e| transport_error(e, "delete token"))?;
            if !delete.status().is_success() && delete.status() != reqwest::StatusCode::NOT_FOUND {
                return Err(classify_status(delete.status(), "delete token"));
            }
            debug!(user, token = token_name, "rotated out stale token");
        }

        let create = self
            .authed(self.http.post(self.api(&format!("/users/{user}/tokens"))))
            .json(&json!({
                "name": token_name,
                "scopes": ["write:repository", "write:organization", "write:user"],
            }))
            .send()
            .await
            .map_err(|e| transport_error(e, "create token"))?;
        if !create.status().is_success() {
            return Err(classify_status(create.status(), "create token"));
        }
        let created: CreatedToken = create
            .json()
            .await
            .map_err(|e| transport_error(e, "decode token"))?;
        info!(user, token = token_name, "issued fresh token");
        Ok(created.sha1)
    }

    fn clone_url(&self, org: &str, repo: &str, internal: bool) -> String {
        let base = if internal {
            self.internal_url.as_deref().unwrap_or(&self.base_url)
        } else {
            &self.base_url
        };
        format!("{base}/{org}/{repo}.git")
    }
}
