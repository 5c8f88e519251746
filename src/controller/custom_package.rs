//! CustomPackage reconciler
//!
//! Expands one `CustomPackage` into a child `GitRepository` plus an ArgoCD
//! registration:
//!
//! 1. Validate the ArgoCD descriptor; malformed specs are terminal until
//!    edited.
//! 2. Resolve the Application manifest from the remote clone or the local
//!    filesystem, under the repository lock.
//! 3. When `replicate` is set, create the owner-referenced child
//!    GitRepository (deterministic name, no duplicates) and rewrite the
//!    Application's `repoURL`/`path` to the managed git server.
//! 4. Apply the Application and record the child reference on status.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::crd::{
    Condition, CustomPackage, CustomPackageSpec, CustomPackageStatus, GitProviderSpec,
    GitRepository, GitRepositorySource, GitRepositorySpec, ObjectRef, ProviderName,
};
use crate::error::{Error, Result};
use crate::git;
use crate::install;
use crate::manifests::render::decode_objects;
use crate::observability::metrics;
use crate::repo_lock::RepoLock;

use super::{Context, MANAGED_ORG};

pub const CONTROLLER_NAME: &str = "custompackage";

const SYNC_PERIOD: Duration = Duration::from_secs(300);

pub async fn reconcile(pkg: Arc<CustomPackage>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = pkg.name_any();
    let namespace = pkg.namespace().unwrap_or_else(|| "default".to_string());
    metrics::increment_reconciliations(CONTROLLER_NAME);
    info!(%name, %namespace, "reconciling CustomPackage");

    match reconcile_inner(&pkg, &ctx, &name, &namespace).await {
        Ok(action) => {
            metrics::observe_reconciliation_duration(
                CONTROLLER_NAME,
                start.elapsed().as_secs_f64(),
            );
            Ok(action)
        }
        // Terminal validation failures are recorded on status and not
        // requeued; only a spec edit wakes the object up again.
        Err(err) if err.is_terminal() => {
            warn!(%name, %err, "CustomPackage spec is invalid, waiting for edit");
            metrics::increment_reconciliation_errors(CONTROLLER_NAME, err.metric_label());
            let status = CustomPackageStatus {
                conditions: vec![Condition::not_ready("InvalidSpec", &err.to_string())],
                observed_generation: pkg.metadata.generation,
                ..current_status(&pkg)
            };
            publish_status(&ctx, &namespace, &name, &status).await?;
            Ok(Action::await_change())
        }
        Err(err) => Err(err),
    }
}

pub fn error_policy(pkg: Arc<CustomPackage>, error: &Error, _ctx: Arc<Context>) -> Action {
    metrics::increment_reconciliation_errors(CONTROLLER_NAME, error.metric_label());
    warn!(name = %pkg.name_any(), %error, "CustomPackage reconcile failed");
    Action::requeue(Duration::from_secs(60))
}

async fn reconcile_inner(
    pkg: &CustomPackage,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action> {
    validate(&pkg.spec)?;

    // Resolve the Application manifest, cloning under the repository lock
    // when the source is remote.
    let mut scratch: Option<TempDir> = None;
    let (base_dir, app_path) = match &pkg.spec.remote_repository {
        Some(remote) => {
            let key = RepoLock::key(&remote.url, &remote.path);
            let _guard = ctx.repo_lock.lock(&key).await;
            let dir = TempDir::new()?;
            git::clone_shallow(&remote.url, &remote.r#ref, remote.clone_submodules, dir.path())
                .await?;
            let base = if remote.path == "." {
                dir.path().to_path_buf()
            } else {
                dir.path().join(&remote.path)
            };
            let app = base.join(&pkg.spec.argo_cd.application_file);
            if !app.is_file() {
                return Err(Error::Validation(format!(
                    "applicationFile {} not found in {}",
                    pkg.spec.argo_cd.application_file, remote.url
                )));
            }
            scratch = Some(dir);
            (base, app)
        }
        None => {
            let app = PathBuf::from(&pkg.spec.argo_cd.application_file);
            if !app.is_file() {
                return Err(Error::Validation(format!(
                    "applicationFile {} does not exist",
                    app.display()
                )));
            }
            let base = app
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            (base, app)
        }
    };

    let mut application = load_application(&app_path, &pkg.spec)?;
    let child_name = child_repository_name(name, &pkg.spec.argo_cd.application_file);

    let mut refs = current_status(pkg).git_repository_refs;
    let mut synced = current_status(pkg).synced;

    if pkg.spec.replicate {
        let child_source = match &pkg.spec.remote_repository {
            Some(remote) => GitRepositorySource::Remote(remote.clone()),
            None => GitRepositorySource::Local {
                path: base_dir.display().to_string(),
            },
        };
        ensure_child_repository(ctx, pkg, namespace, &child_name, child_source).await?;

        let internal_repo_url = format!(
            "{}/{MANAGED_ORG}/{child_name}.git",
            pkg.spec.internal_git_server_url.trim_end_matches('/')
        );
        rewrite_to_managed_repository(&mut application, &internal_repo_url);

        let reference = ObjectRef {
            name: child_name.clone(),
            namespace: namespace.to_string(),
        };
        if !refs.contains(&reference) {
            refs.push(reference);
        }

        // The synced latch transitions local -> in-cluster exactly once,
        // when the child repository confirms the in-cluster URL.
        if !synced && pkg.spec.remote_repository.is_none() {
            synced = child_repository_matches(ctx, namespace, &child_name, &internal_repo_url)
                .await?;
        } else if pkg.spec.remote_repository.is_some() {
            synced = true;
        }
    } else {
        // Reference-only package: register the Application as-is.
        synced = true;
    }

    apply_application(ctx, &pkg.spec, application).await?;
    drop(scratch);

    let status = CustomPackageStatus {
        git_repository_refs: refs,
        synced,
        conditions: vec![if synced {
            Condition::ready("PackageRegistered", "package registered with ArgoCD")
        } else {
            Condition::not_ready("AwaitingRepositorySync", "child repository not yet synced")
        }],
        observed_generation: pkg.metadata.generation,
    };
    publish_status(ctx, namespace, name, &status).await?;
    info!(%name, synced, "CustomPackage reconciled");
    Ok(Action::requeue(SYNC_PERIOD))
}

fn validate(spec: &CustomPackageSpec) -> Result<()> {
    if spec.argo_cd.name.is_empty() {
        return Err(Error::Validation("argoCD.name is required".to_string()));
    }
    if spec.argo_cd.namespace.is_empty() {
        return Err(Error::Validation("argoCD.namespace is required".to_string()));
    }
    if spec.argo_cd.application_file.is_empty() {
        return Err(Error::Validation(
            "argoCD.applicationFile is required".to_string(),
        ));
    }
    if spec.replicate && spec.internal_git_server_url.is_empty() {
        return Err(Error::Validation(
            "internalGitServerURL is required when replicate is set".to_string(),
        ));
    }
    Ok(())
}

/// Deterministic child repository name derived from the package identity,
/// so repeated reconciles find the same object instead of creating
/// duplicates.
pub fn child_repository_name(package_name: &str, application_file: &str) -> String {
    let stem = Path::new(application_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("app");
    format!("{package_name}-{stem}")
}

fn load_application(path: &Path, spec: &CustomPackageSpec) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Render(format!("read {}: {e}", path.display())))?;
    let objects = decode_objects(&content)?;
    let object = objects
        .into_iter()
        .next()
        .ok_or_else(|| Error::Validation("applicationFile contains no objects".to_string()))?;

    let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    if kind != spec.argo_cd.r#type.kind() {
        return Err(Error::Validation(format!(
            "applicationFile is a {kind}, expected {}",
            spec.argo_cd.r#type.kind()
        )));
    }
    Ok(serde_json::to_value(&object)?)
}

/// Point the descriptor at the managed repository. The child repository's
/// root IS the resolved source tree (a remote subtree included), so the
/// rewritten path is always the repository root.
fn rewrite_to_managed_repository(application: &mut Value, repo_url: &str) -> usize {
    rewrite_argocd_source(application, repo_url, ".")
}

/// Point every ArgoCD source block at the managed git server. Covers
/// `spec.source`, `spec.sources[]` and the ApplicationSet template
/// equivalents. Returns how many blocks were rewritten.
pub fn rewrite_argocd_source(application: &mut Value, repo_url: &str, path: &str) -> usize {
    let mut rewritten = 0;
    let candidates = [
        vec!["spec", "source"],
        vec!["spec", "template", "spec", "source"],
    ];
    for chain in candidates {
        if let Some(block) = lookup_mut(application, &chain) {
            rewritten += rewrite_block(block, repo_url, path);
        }
    }
    let list_candidates = [
        vec!["spec", "sources"],
        vec!["spec", "template", "spec", "sources"],
    ];
    for chain in list_candidates {
        if let Some(Value::Array(blocks)) = lookup_mut(application, &chain) {
            for block in blocks {
                rewritten += rewrite_block(block, repo_url, path);
            }
        }
    }
    rewritten
}

fn rewrite_block(block: &mut Value, repo_url: &str, path: &str) -> usize {
    let Some(map) = block.as_object_mut() else {
        return 0;
    };
    if !map.contains_key("repoURL") {
        return 0;
    }
    map.insert("repoURL".to_string(), Value::String(repo_url.to_string()));
    map.insert("path".to_string(), Value::String(path.to_string()));
    1
}

fn lookup_mut<'a>(value: &'a mut Value, chain: &[&str]) -> Option<&'a mut Value> {
    let mut current = value;
    for key in chain {
        current = current.get_mut(key)?;
    }
    Some(current)
}

/// The child GitRepository spec this package currently asks for.
fn child_repository_spec(pkg: &CustomPackage, source: GitRepositorySource) -> GitRepositorySpec {
    GitRepositorySpec {
        provider: GitProviderSpec {
            name: ProviderName::Gitea,
            git_url: pkg.spec.git_server_url.clone(),
            internal_git_url: Some(pkg.spec.internal_git_server_url.clone()),
            organization_name: MANAGED_ORG.to_string(),
        },
        source,
        secret_ref: Some(pkg.spec.git_server_auth_secret_ref.clone()),
        customization: None,
    }
}

async fn ensure_child_repository(
    ctx: &Context,
    pkg: &CustomPackage,
    namespace: &str,
    child_name: &str,
    source: GitRepositorySource,
) -> Result<()> {
    let api: Api<GitRepository> = Api::namespaced(ctx.client.clone(), namespace);
    let spec = child_repository_spec(pkg, source);

    // Package edits (a new ref, path or credential) propagate to an existing
    // child instead of leaving it pinned to the spec it was born with.
    if let Some(existing) = api.get_opt(child_name).await? {
        if serde_json::to_value(&existing.spec)? == serde_json::to_value(&spec)? {
            return Ok(());
        }
        let patch = serde_json::json!({ "spec": spec });
        api.patch(
            child_name,
            &PatchParams::apply(install::FIELD_MANAGER),
            &Patch::Merge(patch),
        )
        .await?;
        info!(child = child_name, "updated child GitRepository spec");
        return Ok(());
    }

    let child = GitRepository {
        metadata: ObjectMeta {
            name: Some(child_name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: super::owner_reference(pkg).map(|r| vec![r]),
            ..Default::default()
        },
        spec,
        status: None,
    };
    api.create(&PostParams::default(), &child).await?;
    info!(child = child_name, "created child GitRepository");
    Ok(())
}

/// Confirm the child repository has published the expected in-cluster URL.
async fn child_repository_matches(
    ctx: &Context,
    namespace: &str,
    child_name: &str,
    internal_repo_url: &str,
) -> Result<bool> {
    let api: Api<GitRepository> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(child) = api.get_opt(child_name).await? else {
        return Ok(false);
    };
    Ok(child.status.as_ref().is_some_and(|s| {
        s.synced && s.internal_git_repository_url.as_deref() == Some(internal_repo_url)
    }))
}

async fn apply_application(ctx: &Context, spec: &CustomPackageSpec, mut app: Value) -> Result<()> {
    // The registration target comes from the descriptor, not the file.
    app["metadata"]["name"] = Value::String(spec.argo_cd.name.clone());
    app["metadata"]["namespace"] = Value::String(spec.argo_cd.namespace.clone());
    let object = serde_json::from_value(app)
        .map_err(|e| Error::Render(format!("rewritten application is invalid: {e}")))?;
    install::apply_objects(&ctx.client, &[object]).await
}

fn current_status(pkg: &CustomPackage) -> CustomPackageStatus {
    pkg.status.clone().unwrap_or_default()
}

async fn publish_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &CustomPackageStatus,
) -> Result<()> {
    let api: Api<CustomPackage> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(install::FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}
