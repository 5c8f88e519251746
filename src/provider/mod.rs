//! # Git Provider Trait
//!
//! Abstract interface over the git hosts backing platform repositories.
//!
//! This trait allows the controllers to work with multiple providers
//! (Gitea, GitHub) through a unified interface; reconcilers select the
//! implementation once based on `spec.provider.name` and depend only on the
//! trait afterwards.

mod gitea;
mod github;

pub use gitea::Gitea;
pub use github::Github;

use async_trait::async_trait;

use crate::crd::{GitProviderSpec, ProviderName};
use crate::error::{Error, Result};

/// Credentials for the provider's REST API.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub username: String,
    pub password: String,
}

/// Organization on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgRef {
    pub name: String,
}

/// Repository on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub organization: String,
    pub name: String,
    /// Clone URL as reported by the provider API
    pub clone_url: String,
}

/// Git provider backing platform repositories.
///
/// Implementations must treat "already exists" as an idempotent success:
/// repeated reconciles call `ensure_*` every pass.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Create the organization if it does not exist and return it.
    async fn ensure_organization(&self, name: &str) -> Result<OrgRef>;

    /// Create the repository under `org` if it does not exist and return it.
    async fn ensure_repository(&self, org: &str, name: &str) -> Result<RepoRef>;

    /// Issue a fresh API token for `user`, deleting any stale token with the
    /// same name first so repeated reconciles do not accumulate dead tokens.
    async fn ensure_token(&self, user: &str, token_name: &str) -> Result<String>;

    /// Clone URL for a repository. `internal` returns the cluster-local DNS
    /// form, otherwise the ingress/public form.
    fn clone_url(&self, org: &str, repo: &str, internal: bool) -> String;
}

/// Select the provider implementation for a GitRepository spec.
pub fn for_spec(
    spec: &GitProviderSpec,
    credentials: ProviderCredentials,
) -> Box<dyn GitProvider> {
    match spec.name {
        ProviderName::Gitea => Box::new(Gitea::new(
            &spec.git_url,
            spec.internal_git_url.as_deref(),
            credentials,
        )),
        ProviderName::Github => Box::new(Github::new(&spec.git_url, credentials)),
    }
}

/// Map an HTTP response status to the error taxonomy. Transient transport
/// and server errors are retried by backoff; 4xx auth/validation errors
/// surface to the reconciler fast.
pub(crate) fn classify_status(status: reqwest::StatusCode, context: &str) -> Error {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        Error::Auth(format!("{context}: HTTP {status}"))
    } else if status.is_client_error() {
        Error::Validation(format!("{context}: HTTP {status}"))
    } else {
        Error::TransientIo(format!("{context}: HTTP {status}"))
    }
}

pub(crate) fn transport_error(err: reqwest::Error, context: &str) -> Error {
    Error::TransientIo(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_errors() {
        let err = classify_status(reqwest::StatusCode::UNAUTHORIZED, "create org");
        assert!(matches!(err, Error::Auth(_)));
        let err = classify_status(reqwest::StatusCode::FORBIDDEN, "create org");
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn client_errors_are_validation_server_errors_transient() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "x"),
            Error::Validation(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, "x"),
            Error::TransientIo(_)
        ));
    }
}
