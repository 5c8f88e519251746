//! GitRepository reconciler
//!
//! Drives a repository through provision, content sync and status publication
//! on every pass:
//!
//! 1. Ensure the provider-side organization and repository exist.
//! 2. Resolve `spec.source` (embedded package, local directory, or a shallow
//!    remote clone into a scratch directory).
//! 3. Push the resolved tree only when its content hash differs from
//!    `status.commit.hash`, holding the repository's lock for the whole
//!    clone-to-push sequence.
//! 4. Publish clone URLs, the content hash and `synced` on status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::crd::{
    Condition, EmbeddedPackage, GitRepository, GitRepositorySource, GitRepositorySpec,
    GitRepositoryStatus, PackageCustomization, Platform, SecretReference,
};
use crate::error::{Error, Result};
use crate::git;
use crate::manifests::{self, ManifestSource, TemplateData};
use crate::observability::metrics;
use crate::provider;
use crate::repo_lock::RepoLock;

use super::Context;

pub const CONTROLLER_NAME: &str = "gitrepository";

/// Resync period once a repository reports synced.
const SYNC_PERIOD: Duration = Duration::from_secs(300);

/// Deadline on the locked clone-to-push sequence. A hung git subprocess must
/// not hold the repository lock and a controller worker indefinitely.
const GIT_OP_TIMEOUT: Duration = Duration::from_secs(300);

/// A resolved source tree. Holds the scratch directory (if any) so its
/// cleanup is tied to this value's lifetime regardless of outcome.
#[derive(Debug)]
struct ResolvedSource {
    dir: PathBuf,
    _scratch: Option<TempDir>,
}

pub async fn reconcile(repo: Arc<GitRepository>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = repo.name_any();
    let namespace = repo.namespace().unwrap_or_else(|| "default".to_string());
    metrics::increment_reconciliations(CONTROLLER_NAME);
    info!(%name, %namespace, "reconciling GitRepository");

    let secret_ref = repo
        .spec
        .secret_ref
        .as_ref()
        .ok_or_else(|| Error::Validation("spec.secretRef is required".to_string()))?;
    let credentials =
        super::read_credentials(&ctx.client, &secret_ref.name, &secret_ref.namespace).await?;
    let username = credentials.username.clone();
    let password = credentials.password.clone();
    let provider = provider::for_spec(&repo.spec.provider, credentials);

    let org = &repo.spec.provider.organization_name;
    provider.ensure_organization(org).await?;
    provider.ensure_repository(org, &name).await?;

    let external_url = provider.clone_url(org, &name, false);
    let internal_url = provider.clone_url(org, &name, true);
    let source_path = source_path(&repo.spec.source);

    // Embedded content is rendered with the owning Platform's values, so look
    // them up before the deadline starts.
    let template_data = match &repo.spec.source {
        GitRepositorySource::Embedded { .. } => {
            Some(platform_template_data(&ctx, &repo, &namespace).await?)
        }
        _ => None,
    };

    // One task at a time per repository key: the lock covers resolve (which
    // may clone) through push. The deadline releases the lock if a git
    // subprocess hangs.
    let lock_key = RepoLock::key(&external_url, &source_path);
    let content_hash = with_git_deadline(async {
        let _guard = ctx.repo_lock.lock(&lock_key).await;

        let resolved = resolve_source(&repo.spec, template_data.as_ref()).await?;
        let content_hash = git::tree_hash(&resolved.dir)?;

        let current = repo
            .status
            .as_ref()
            .and_then(|s| s.commit.hash.as_deref());
        if current == Some(content_hash.as_str()) {
            info!(%name, hash = %content_hash, "content already current, no push");
        } else {
            // Push over the cluster-local URL; the ingress form is for humans.
            let push_url = git::authenticated_url(&internal_url, &username, &password)?;
            git::sync_to_remote(
                &resolved.dir,
                &push_url,
                &format!("sync {name} from {}", source_kind(&repo.spec.source)),
            )
            .await?;
            metrics::increment_git_pushes();
            info!(%name, hash = %content_hash, "pushed repository content");
        }
        Ok(content_hash)
    })
    .await?;

    let status = GitRepositoryStatus {
        synced: true,
        commit: crate::crd::CommitStatus {
            hash: Some(content_hash),
        },
        internal_git_repository_url: Some(internal_url),
        external_git_repository_url: Some(external_url),
        path: Some(source_path),
        conditions: vec![Condition::ready("SyncSucceeded", "repository content is current")],
        observed_generation: repo.metadata.generation,
    };
    publish_status(&ctx, &namespace, &name, &status).await?;

    metrics::observe_reconciliation_duration(CONTROLLER_NAME, start.elapsed().as_secs_f64());
    Ok(Action::requeue(SYNC_PERIOD))
}

pub fn error_policy(repo: Arc<GitRepository>, error: &Error, _ctx: Arc<Context>) -> Action {
    metrics::increment_reconciliation_errors(CONTROLLER_NAME, error.metric_label());
    let name = repo.name_any();
    match error {
        // Credentials may be rotated externally, so auth errors stay retryable.
        Error::Auth(_) => error!(%name, %error, "git provider rejected credentials"),
        _ => warn!(%name, %error, "GitRepository reconcile failed"),
    }
    if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

/// Enforce [`GIT_OP_TIMEOUT`] on the locked git sequence. Dropping the inner
/// future on timeout releases the repository lock.
async fn with_git_deadline<T>(op: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(GIT_OP_TIMEOUT, op).await {
        Ok(result) => result,
        Err(_) => Err(Error::Git(format!(
            "git operation sequence exceeded {}s deadline",
            GIT_OP_TIMEOUT.as_secs()
        ))),
    }
}

/// Template values from the Platform that seeded this repository. Embedded
/// packages only exist as seeded children, so a missing owner is a spec
/// problem, not a transient one.
async fn platform_template_data(
    ctx: &Context,
    repo: &GitRepository,
    namespace: &str,
) -> Result<TemplateData> {
    let owner = repo
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.kind == "Platform"))
        .ok_or_else(|| {
            Error::Validation("embedded sources require a Platform owner".to_string())
        })?;
    let api: Api<Platform> = Api::namespaced(ctx.client.clone(), namespace);
    let platform = api.get(&owner.name).await?;
    let spec = &platform.spec;
    let mut data = TemplateData::new(&spec.protocol, &spec.host, spec.port, spec.use_path_routing);
    data.static_password = spec.static_password;
    Ok(data)
}

/// Materialize the source as a directory tree.
async fn resolve_source(
    spec: &GitRepositorySpec,
    data: Option<&TemplateData>,
) -> Result<ResolvedSource> {
    match &spec.source {
        GitRepositorySource::Embedded { name } => {
            let data = data.ok_or_else(|| {
                Error::Validation("embedded sources require platform template values".to_string())
            })?;
            resolve_embedded(*name, data, spec.customization.as_ref())
        }
        GitRepositorySource::Local { path } => {
            let dir = PathBuf::from(path);
            if !dir.is_dir() {
                return Err(Error::Validation(format!(
                    "source.path {path} is not a directory"
                )));
            }
            Ok(ResolvedSource {
                dir,
                _scratch: None,
            })
        }
        GitRepositorySource::Remote(remote) => {
            let scratch = TempDir::new()?;
            git::clone_shallow(
                &remote.url,
                &remote.r#ref,
                remote.clone_submodules,
                scratch.path(),
            )
            .await?;
            let dir = if remote.path == "." {
                scratch.path().to_path_buf()
            } else {
                let sub = scratch.path().join(&remote.path);
                if !sub.is_dir() {
                    return Err(Error::Validation(format!(
                        "remote path {} not found in {}",
                        remote.path, remote.url
                    )));
                }
                sub
            };
            Ok(ResolvedSource {
                dir,
                _scratch: Some(scratch),
            })
        }
    }
}

/// Render an embedded package into a scratch tree, one file per object, with
/// the package customization merged in. What lands on the git server is the
/// same manifest set the installer applies, not raw templates.
fn resolve_embedded(
    package: EmbeddedPackage,
    data: &TemplateData,
    customization: Option<&PackageCustomization>,
) -> Result<ResolvedSource> {
    let overlay = customization
        .filter(|c| c.name == package.as_str())
        .map(|c| PathBuf::from(&c.file_path));
    let objects = manifests::render(&ManifestSource::Embedded(package), data, overlay.as_deref())?;

    let scratch = TempDir::new()?;
    for object in &objects {
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.to_lowercase())
            .unwrap_or_default();
        let object_name = object.metadata.name.as_deref().unwrap_or_default();
        let yaml = serde_yaml::to_string(object)
            .map_err(|e| Error::Render(format!("serialize {kind}/{object_name}: {e}")))?;
        std::fs::write(scratch.path().join(format!("{kind}-{object_name}.yaml")), yaml)?;
    }
    Ok(ResolvedSource {
        dir: scratch.path().to_path_buf(),
        _scratch: Some(scratch),
    })
}

fn source_path(source: &GitRepositorySource) -> String {
    match source {
        GitRepositorySource::Embedded { name } => name.as_str().to_string(),
        GitRepositorySource::Local { path } => path.clone(),
        GitRepositorySource::Remote(remote) => remote.path.clone(),
    }
}

fn source_kind(source: &GitRepositorySource) -> &'static str {
    match source {
        GitRepositorySource::Embedded { .. } => "embedded",
        GitRepositorySource::Local { .. } => "local",
        GitRepositorySource::Remote(_) => "remote",
    }
}

async fn publish_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &GitRepositoryStatus,
) -> Result<()> {
    let api: Api<GitRepository> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(crate::install::FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

/// Spec used when the Platform controller seeds embedded repositories.
pub fn embedded_repository_spec(
    package: crate::crd::EmbeddedPackage,
    provider: crate::crd::GitProviderSpec,
    secret_ref: SecretReference,
) -> crate::crd::GitRepositorySpec {
    crate::crd::GitRepositorySpec {
        provider,
        source: GitRepositorySource::Embedded { name: package },
        secret_ref: Some(secret_ref),
        customization: None,
    }
}
