//! # Embedded Installation
//!
//! Installs one core package (ArgoCD, ingress controller, git server) by
//! rendering its embedded manifests, applying them with idempotent
//! convergence semantics, and checking a designated Deployment for
//! readiness. "Not ready yet" is an expected state, not an error: callers
//! get [`InstallOutcome::Pending`] and requeue.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use std::path::Path;
use tracing::{debug, info};

use crate::crd::EmbeddedPackage;
use crate::error::{Error, Result};
use crate::manifests::{self, embedded, ManifestSource, TemplateData};

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "platform-controller";

/// Outcome of one install pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Manifests applied and the monitored Deployment is ready.
    Ready,
    /// Manifests applied; the monitored Deployment is not yet available.
    Pending,
}

/// One core package installation.
#[derive(Debug, Clone)]
pub struct EmbeddedInstallation {
    package: EmbeddedPackage,
    monitored_namespace: &'static str,
    monitored_deployment: &'static str,
}

impl EmbeddedInstallation {
    pub fn new(package: EmbeddedPackage) -> Self {
        let (namespace, deployment) = embedded::monitored_deployment(package);
        Self {
            package,
            monitored_namespace: namespace,
            monitored_deployment: deployment,
        }
    }

    pub fn package(&self) -> EmbeddedPackage {
        self.package
    }

    /// Render, apply, and check readiness.
    ///
    /// Apply errors surface as reconcile errors so framework backoff
    /// applies; a not-yet-ready Deployment is reported as `Pending`.
    pub async fn install(
        &self,
        client: &Client,
        data: &TemplateData,
        customization: Option<&Path>,
    ) -> Result<InstallOutcome> {
        let objects = manifests::render(
            &ManifestSource::Embedded(self.package),
            data,
            customization,
        )?;
        apply_objects(client, &objects).await?;

        if self.monitored_ready(client).await? {
            info!(package = self.package.as_str(), "package available");
            Ok(InstallOutcome::Ready)
        } else {
            debug!(
                package = self.package.as_str(),
                deployment = self.monitored_deployment,
                "monitored deployment not ready yet"
            );
            Ok(InstallOutcome::Pending)
        }
    }

    async fn monitored_ready(&self, client: &Client) -> Result<bool> {
        let deployments: Api<Deployment> =
            Api::namespaced(client.clone(), self.monitored_namespace);
        let Some(deployment) = deployments.get_opt(self.monitored_deployment).await? else {
            return Ok(false);
        };
        Ok(deployment_ready(&deployment))
    }
}

/// Ready when observed ready replicas match the desired count.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}

/// Apply objects with create/update-by-identity semantics via server-side
/// apply: repeated applies of unchanged manifests produce no diff, and
/// existing objects converge without delete+recreate.
pub async fn apply_objects(client: &Client, objects: &[DynamicObject]) -> Result<()> {
    let params = PatchParams::apply(FIELD_MANAGER).force();
    for object in objects {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Render("object has no name".to_string()))?;
        let api = dynamic_api(client, object)?;
        api.patch(name, &params, &Patch::Apply(object)).await?;
        debug!(
            kind = object.types.as_ref().map(|t| t.kind.as_str()),
            name, "applied object"
        );
    }
    Ok(())
}

/// Build a dynamic API for an object from its type metadata.
fn dynamic_api(client: &Client, object: &DynamicObject) -> Result<Api<DynamicObject>> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::Render("object has no apiVersion/kind".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    let gvk = GroupVersionKind::gvk(group, version, &types.kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, &plural(&types.kind));

    if cluster_scoped(&types.kind) {
        Ok(Api::all_with(client.clone(), &resource))
    } else {
        let namespace = object.metadata.namespace.as_deref().unwrap_or("default");
        Ok(Api::namespaced_with(client.clone(), namespace, &resource))
    }
}

/// Resource plurals, with overrides for names the naive
/// `kind.to_lowercase() + "s"` guess gets wrong.
fn plural(kind: &str) -> String {
    let known = match kind {
        "Namespace" => "namespaces",
        "Deployment" => "deployments",
        "Service" => "services",
        "ConfigMap" => "configmaps",
        "Secret" => "secrets",
        "ServiceAccount" => "serviceaccounts",
        "Ingress" => "ingresses",
        "IngressClass" => "ingressclasses",
        "NetworkPolicy" => "networkpolicies",
        "Role" => "roles",
        "RoleBinding" => "rolebindings",
        "ClusterRole" => "clusterroles",
        "ClusterRoleBinding" => "clusterrolebindings",
        "StatefulSet" => "statefulsets",
        "DaemonSet" => "daemonsets",
        "PersistentVolumeClaim" => "persistentvolumeclaims",
        "CustomResourceDefinition" => "customresourcedefinitions",
        "Application" => "applications",
        "ApplicationSet" => "applicationsets",
        "GitRepository" => "gitrepositories",
        "CustomPackage" => "custompackages",
        "Platform" => "platforms",
        _ => return format!("{}s", kind.to_lowercase()),
    };
    known.to_string()
}

fn cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "CustomResourceDefinition"
            | "IngressClass"
            | "StorageClass"
            | "PriorityClass"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    fn deployment(desired: Option<i32>, ready: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: desired,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn readiness_compares_ready_against_desired() {
        assert!(deployment_ready(&deployment(Some(1), Some(1))));
        assert!(!deployment_ready(&deployment(Some(1), Some(0))));
        assert!(!deployment_ready(&deployment(Some(2), Some(1))));
        assert!(!deployment_ready(&deployment(Some(1), None)));
    }

    #[test]
    fn unspecified_replicas_default_to_one() {
        assert!(deployment_ready(&deployment(None, Some(1))));
        assert!(!deployment_ready(&deployment(None, Some(0))));
    }

    #[test]
    fn plural_covers_irregular_kinds() {
        assert_eq!(plural("Ingress"), "ingresses");
        assert_eq!(plural("NetworkPolicy"), "networkpolicies");
        assert_eq!(plural("GitRepository"), "gitrepositories");
    }

    #[test]
    fn namespaces_are_cluster_scoped() {
        assert!(cluster_scoped("Namespace"));
        assert!(!cluster_scoped("Deployment"));
    }

    #[test]
    fn monitored_targets_match_packages() {
        let install = EmbeddedInstallation::new(EmbeddedPackage::Nginx);
        assert_eq!(install.monitored_namespace, "ingress-nginx");
        assert_eq!(install.monitored_deployment, "ingress-nginx-controller");
    }
}
