//! # Controllers
//!
//! The three reconcile loops behind the platform: `Platform` bootstraps the
//! core packages, `GitRepository` provisions and syncs repositories on the
//! managed git server, `CustomPackage` expands external packages into child
//! repositories plus an ArgoCD registration.
//!
//! All controllers share one [`Context`]: the Kubernetes client and the
//! injected [`RepoLock`] registry. Reconcilers are level-triggered and derive
//! every action from current spec+status; no in-memory state is required for
//! correctness.

pub mod backoff;
pub mod custom_package;
pub mod git_repository;
pub mod platform;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, Resource};

use crate::error::{Error, Result};
use crate::provider::ProviderCredentials;
use crate::repo_lock::RepoLock;

/// Organization on the managed git server that platform repositories live in.
pub const MANAGED_ORG: &str = "adhar";

/// Shared reconciler context, constructed once at startup.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub repo_lock: RepoLock,
    /// Paces "not ready yet" requeues per object.
    pub readiness_backoff: backoff::BackoffTable,
}

impl Context {
    pub fn new(client: Client, repo_lock: RepoLock) -> Arc<Self> {
        Arc::new(Self {
            client,
            repo_lock,
            readiness_backoff: backoff::BackoffTable::new(),
        })
    }
}

/// Read git credentials (`username`/`password` keys) from a Secret.
pub async fn read_credentials(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<ProviderCredentials> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(name).await?;
    let data = secret.data.unwrap_or_default();
    let field = |key: &str| -> Result<String> {
        let bytes = data
            .get(key)
            .ok_or_else(|| Error::Validation(format!("secret {namespace}/{name} has no {key} key")))?;
        String::from_utf8(bytes.0.clone())
            .map_err(|_| Error::Validation(format!("secret {namespace}/{name} {key} is not UTF-8")))
    };
    Ok(ProviderCredentials {
        username: field("username")?,
        password: field("password")?,
    })
}

/// Owner reference to `owner`, so child objects are garbage-collected with
/// their parent instead of needing finalizer bookkeeping.
pub fn owner_reference<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    Some(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: owner.meta().name.clone()?,
        uid: owner.meta().uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
