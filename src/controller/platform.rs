//! Platform reconciler
//!
//! Bootstraps the three core packages in dependency order (Gitea, then the
//! ingress controller, then ArgoCD) and seeds an embedded `GitRepository`
//! for each once everything is available. Availability flags on status latch
//! forward: a package that has been observed Ready stays available even if a
//! later reconcile sees it mid-rollout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::crd::{
    Condition, EmbeddedPackage, GitProviderSpec, GitRepository, Platform, PlatformStatus,
    ProviderName, SecretReference,
};
use crate::error::{Error, Result};
use crate::install::{EmbeddedInstallation, InstallOutcome};
use crate::manifests::render::TemplateData;
use crate::observability::metrics;
use crate::provider::{Gitea, GitProvider};

use super::{git_repository, Context, MANAGED_ORG};

pub const CONTROLLER_NAME: &str = "platform";

/// Namespace and name of the managed git server admin credential.
pub const GITEA_NAMESPACE: &str = "gitea";
pub const CREDENTIAL_SECRET: &str = "gitea-credential";
pub const GITEA_ADMIN_USER: &str = "giteaAdmin";
pub const GITEA_INTERNAL_URL: &str = "http://gitea.gitea.svc.cluster.local:3000";

const DEV_PASSWORD: &str = "developer";
const SYNC_PERIOD: Duration = Duration::from_secs(300);

pub async fn reconcile(platform: Arc<Platform>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = platform.name_any();
    let namespace = platform.namespace().unwrap_or_else(|| "default".to_string());
    metrics::increment_reconciliations(CONTROLLER_NAME);
    info!(%name, %namespace, "reconciling Platform");

    let spec = &platform.spec;
    if spec.git_provider != ProviderName::Gitea {
        return Err(Error::Validation(
            "only the gitea provider can back a Platform".to_string(),
        ));
    }

    let mut data = TemplateData::new(&spec.protocol, &spec.host, spec.port, spec.use_path_routing);
    data.static_password = spec.static_password;

    let mut status = platform.status.clone().unwrap_or_default();

    // Gitea first: its namespace must exist before the credential secret,
    // and everything downstream needs a reachable git server.
    let gitea = EmbeddedInstallation::new(EmbeddedPackage::Gitea)
        .install(&ctx.client, &data, None)
        .await?;
    ensure_credential_secret(&ctx, &platform).await?;
    status.gitea_available = status.gitea_available || gitea == InstallOutcome::Ready;
    if status.gitea_available {
        rotate_admin_token(&ctx).await?;
    }

    let nginx = EmbeddedInstallation::new(EmbeddedPackage::Nginx)
        .install(&ctx.client, &data, None)
        .await?;
    status.nginx_available = status.nginx_available || nginx == InstallOutcome::Ready;

    let argocd = EmbeddedInstallation::new(EmbeddedPackage::Argocd)
        .install(&ctx.client, &data, None)
        .await?;
    status.argocd_available = status.argocd_available || argocd == InstallOutcome::Ready;

    if status.all_available() {
        seed_embedded_repositories(&ctx, &platform, &namespace).await?;
        status.conditions = vec![Condition::ready(
            "PackagesAvailable",
            "all core packages are available",
        )];
    } else {
        status.conditions = vec![Condition::not_ready(
            "PackagesPending",
            &pending_message(&status),
        )];
    }
    status.observed_generation = platform.metadata.generation;

    publish_status(&ctx, &namespace, &name, &status).await?;
    metrics::observe_reconciliation_duration(CONTROLLER_NAME, start.elapsed().as_secs_f64());

    let backoff_key = format!("{namespace}/{name}");
    if status.all_available() {
        ctx.readiness_backoff.reset(&backoff_key);
        Ok(Action::requeue(SYNC_PERIOD))
    } else {
        // Fibonacci pacing while installs converge; reset once available.
        Ok(Action::requeue(ctx.readiness_backoff.next_delay(&backoff_key)))
    }
}

pub fn error_policy(platform: Arc<Platform>, error: &Error, _ctx: Arc<Context>) -> Action {
    metrics::increment_reconciliation_errors(CONTROLLER_NAME, error.metric_label());
    warn!(name = %platform.name_any(), %error, "Platform reconcile failed");
    if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

fn pending_message(status: &PlatformStatus) -> String {
    let mut pending = Vec::new();
    if !status.gitea_available {
        pending.push("gitea");
    }
    if !status.nginx_available {
        pending.push("nginx");
    }
    if !status.argocd_available {
        pending.push("argocd");
    }
    format!("waiting for: {}", pending.join(", "))
}

/// Admin password for the managed git server. The development password is
/// well-known; the generated one is stable per Platform object so reconciles
/// and reinstalls agree on it.
pub fn admin_password(platform: &Platform) -> String {
    if platform.spec.static_password {
        return DEV_PASSWORD.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(platform.metadata.uid.as_deref().unwrap_or_default());
    hasher.update(platform.name_any());
    let digest = hasher.finalize();
    format!("{digest:x}")[..24].to_string()
}

async fn ensure_credential_secret(ctx: &Context, platform: &Platform) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), GITEA_NAMESPACE);
    if api.get_opt(CREDENTIAL_SECRET).await?.is_some() {
        return Ok(());
    }

    let mut string_data = BTreeMap::new();
    string_data.insert("username".to_string(), GITEA_ADMIN_USER.to_string());
    string_data.insert("password".to_string(), admin_password(platform));
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(CREDENTIAL_SECRET.to_string()),
            namespace: Some(GITEA_NAMESPACE.to_string()),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    };
    api.create(&PostParams::default(), &secret).await?;
    info!(secret = CREDENTIAL_SECRET, namespace = GITEA_NAMESPACE, "created git server credential");
    Ok(())
}

/// Rotate a Gitea API token into the credential Secret under the `token`
/// key. Gitea only returns token values at creation time, so a Secret that
/// already carries one is left alone.
async fn rotate_admin_token(ctx: &Context) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), GITEA_NAMESPACE);
    let Some(secret) = api.get_opt(CREDENTIAL_SECRET).await? else {
        return Ok(());
    };
    if secret
        .data
        .as_ref()
        .is_some_and(|data| data.contains_key("token"))
    {
        return Ok(());
    }

    let credentials =
        super::read_credentials(&ctx.client, CREDENTIAL_SECRET, GITEA_NAMESPACE).await?;
    let username = credentials.username.clone();
    let gitea = Gitea::new(GITEA_INTERNAL_URL, None, credentials);
    let token = gitea.ensure_token(&username, "adhar-platform").await?;

    let patch = serde_json::json!({ "stringData": { "token": token } });
    api.patch(
        CREDENTIAL_SECRET,
        &PatchParams::apply(crate::install::FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;
    info!(secret = CREDENTIAL_SECRET, "rotated git server token into secret");
    Ok(())
}

/// External URL of the managed git server for this Platform.
pub fn external_gitea_url(platform: &Platform) -> String {
    let spec = &platform.spec;
    if spec.use_path_routing {
        format!("{}://{}:{}/gitea", spec.protocol, spec.host, spec.port)
    } else {
        format!("{}://gitea.{}:{}", spec.protocol, spec.host, spec.port)
    }
}

/// Create a `GitRepository` per embedded package, owner-referenced to the
/// Platform so teardown garbage-collects them.
async fn seed_embedded_repositories(
    ctx: &Context,
    platform: &Platform,
    namespace: &str,
) -> Result<()> {
    let api: Api<GitRepository> = Api::namespaced(ctx.client.clone(), namespace);
    let provider = GitProviderSpec {
        name: ProviderName::Gitea,
        git_url: external_gitea_url(platform),
        internal_git_url: Some(GITEA_INTERNAL_URL.to_string()),
        organization_name: MANAGED_ORG.to_string(),
    };
    let secret_ref = SecretReference {
        name: CREDENTIAL_SECRET.to_string(),
        namespace: GITEA_NAMESPACE.to_string(),
    };

    for package in [
        EmbeddedPackage::Argocd,
        EmbeddedPackage::Gitea,
        EmbeddedPackage::Nginx,
    ] {
        let repo_name = embedded_repository_name(&platform.name_any(), package);
        if api.get_opt(&repo_name).await?.is_some() {
            continue;
        }
        let repo = GitRepository {
            metadata: ObjectMeta {
                name: Some(repo_name.clone()),
                namespace: Some(namespace.to_string()),
                owner_references: super::owner_reference(platform).map(|r| vec![r]),
                ..Default::default()
            },
            spec: git_repository::embedded_repository_spec(
                package,
                provider.clone(),
                secret_ref.clone(),
            ),
            status: None,
        };
        api.create(&PostParams::default(), &repo).await?;
        info!(repository = %repo_name, "seeded embedded GitRepository");
    }

    let repositories = api.list(&ListParams::default()).await?;
    metrics::set_repositories_managed(synced_repository_count(&repositories.items) as i64);
    Ok(())
}

/// Repositories counted as managed are those currently reporting synced.
fn synced_repository_count(repositories: &[GitRepository]) -> usize {
    repositories
        .iter()
        .filter(|repo| repo.status.as_ref().is_some_and(|s| s.synced))
        .count()
}

pub fn embedded_repository_name(platform_name: &str, package: EmbeddedPackage) -> String {
    format!("{platform_name}-{}", package.as_str())
}

async fn publish_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &PlatformStatus,
) -> Result<()> {
    let api: Api<Platform> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(crate::install::FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PlatformSpec;

    fn platform(static_password: bool, use_path_routing: bool) -> Platform {
        let mut p = Platform::new(
            "localdev",
            PlatformSpec {
                git_provider: ProviderName::Gitea,
                protocol: "https".to_string(),
                host: "adhar.localtest.me".to_string(),
                port: 8443,
                use_path_routing,
                static_password,
            },
        );
        p.metadata.uid = Some("8e9cbf07-6f89-4a9e-8c4e-1b8c7b1f9d42".to_string());
        p
    }

    #[test]
    fn static_password_uses_development_default() {
        assert_eq!(admin_password(&platform(true, false)), "developer");
    }

    #[test]
    fn generated_password_is_stable_and_not_the_default() {
        let p = platform(false, false);
        let first = admin_password(&p);
        assert_eq!(first, admin_password(&p));
        assert_eq!(first.len(), 24);
        assert_ne!(first, "developer");
    }

    #[test]
    fn gitea_url_follows_routing_mode() {
        assert_eq!(
            external_gitea_url(&platform(true, false)),
            "https://gitea.adhar.localtest.me:8443"
        );
        assert_eq!(
            external_gitea_url(&platform(true, true)),
            "https://adhar.localtest.me:8443/gitea"
        );
    }

    #[test]
    fn managed_count_only_covers_synced_repositories() {
        use crate::crd::GitRepositoryStatus;

        let provider = GitProviderSpec {
            name: ProviderName::Gitea,
            git_url: "https://gitea.adhar.localtest.me:8443".to_string(),
            internal_git_url: Some(GITEA_INTERNAL_URL.to_string()),
            organization_name: "adhar".to_string(),
        };
        let secret_ref = SecretReference {
            name: CREDENTIAL_SECRET.to_string(),
            namespace: GITEA_NAMESPACE.to_string(),
        };
        let repo = |package: EmbeddedPackage, synced: Option<bool>| {
            let mut repo = GitRepository::new(
                &embedded_repository_name("localdev", package),
                git_repository::embedded_repository_spec(
                    package,
                    provider.clone(),
                    secret_ref.clone(),
                ),
            );
            repo.status = synced.map(|synced| GitRepositoryStatus {
                synced,
                ..Default::default()
            });
            repo
        };

        let repositories = [
            repo(EmbeddedPackage::Argocd, Some(true)),
            repo(EmbeddedPackage::Gitea, Some(false)),
            repo(EmbeddedPackage::Nginx, None),
        ];
        assert_eq!(synced_repository_count(&repositories), 1);
    }

    #[test]
    fn embedded_repository_names_are_per_package() {
        assert_eq!(
            embedded_repository_name("localdev", EmbeddedPackage::Argocd),
            "localdev-argocd"
        );
        assert_eq!(
            embedded_repository_name("localdev", EmbeddedPackage::Nginx),
            "localdev-nginx"
        );
    }
}
