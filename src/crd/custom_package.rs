//! CustomPackage CRD
//!
//! A `CustomPackage` points at an ArgoCD Application (or ApplicationSet)
//! manifest, locally on disk or inside a remote repository, and describes
//! whether its content should be replicated into the managed git server.
//! The reconciler expands it into child `GitRepository` objects and registers
//! the rewritten Application with ArgoCD.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::{default_false, Condition, RemoteRepositorySpec, SecretReference};

/// CustomPackage Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: platform.adhar.io/v1alpha1
/// kind: CustomPackage
/// metadata:
///   name: my-app
///   namespace: adhar-system
/// spec:
///   gitServerURL: https://gitea.adhar.localtest.me:8443
///   internalGitServerURL: http://gitea.gitea.svc.cluster.local:3000
///   gitServerAuthSecretRef:
///     name: gitea-credential
///     namespace: gitea
///   remoteRepository:
///     url: https://example.com/my-app.git
///     ref: main
///     path: manifests
///   argoCD:
///     name: my-app
///     namespace: argocd
///     type: Application
///     applicationFile: app.yaml
///   replicate: true
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "CustomPackage",
    group = "platform.adhar.io",
    version = "v1alpha1",
    namespaced,
    status = "CustomPackageStatus",
    printcolumn = r#"{"name":"Synced", "type":"boolean", "jsonPath":".status.synced"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CustomPackageSpec {
    /// External (API) base URL of the managed git server
    #[serde(rename = "gitServerURL")]
    pub git_server_url: String,
    /// Cluster-local base URL of the managed git server
    #[serde(rename = "internalGitServerURL")]
    pub internal_git_server_url: String,
    /// Credentials for pushing to the managed git server
    pub git_server_auth_secret_ref: SecretReference,
    /// Upstream source to mirror. When absent, `argoCD.applicationFile` is an
    /// absolute path on the controller's filesystem.
    #[serde(default)]
    pub remote_repository: Option<RemoteRepositorySpec>,
    /// Where and how to register the content with the GitOps controller
    #[serde(rename = "argoCD")]
    pub argo_cd: ArgoCdPackageSpec,
    /// Copy content into the managed git server instead of referencing the
    /// upstream directly
    #[serde(default = "default_false")]
    pub replicate: bool,
}

/// ArgoCD registration descriptor
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdPackageSpec {
    /// Name of the Application/ApplicationSet object
    pub name: String,
    /// Namespace the object is created in
    pub namespace: String,
    /// Kind of ArgoCD resource
    pub r#type: ArgoCdResourceType,
    /// Path to the Application manifest, relative to the resolved source tree
    /// (or absolute for local packages)
    pub application_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ArgoCdResourceType {
    Application,
    ApplicationSet,
}

impl ArgoCdResourceType {
    pub fn kind(self) -> &'static str {
        match self {
            ArgoCdResourceType::Application => "Application",
            ArgoCdResourceType::ApplicationSet => "ApplicationSet",
        }
    }
}

/// Status of a CustomPackage
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomPackageStatus {
    /// GitRepository objects this package created
    #[serde(default)]
    pub git_repository_refs: Vec<ObjectRef>,
    /// True once local-directory content has been pushed and the in-cluster
    /// repository URL matches. Latched: transient errors never flip it back.
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Reference to an object this package owns
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_round_trips_through_yaml() {
        let yaml = r#"
gitServerURL: https://gitea.example.com:8443
internalGitServerURL: http://gitea.gitea.svc.cluster.local:3000
gitServerAuthSecretRef:
  name: gitea-credential
  namespace: gitea
remoteRepository:
  url: https://example.com/my-app.git
  ref: main
argoCD:
  name: my-app
  namespace: argocd
  type: Application
  applicationFile: app.yaml
replicate: true
"#;
        let spec: CustomPackageSpec = serde_yaml::from_str(yaml).expect("should deserialize");
        assert!(spec.replicate);
        assert_eq!(spec.argo_cd.r#type, ArgoCdResourceType::Application);
        assert_eq!(spec.argo_cd.application_file, "app.yaml");
        assert_eq!(spec.remote_repository.unwrap().r#ref, "main");
    }

    #[test]
    fn server_urls_use_uppercase_url_keys() {
        let yaml = r#"
gitServerURL: https://gitea.example.com:8443
internalGitServerURL: http://gitea.gitea.svc.cluster.local:3000
gitServerAuthSecretRef:
  name: gitea-credential
  namespace: gitea
argoCD:
  name: my-app
  namespace: argocd
  type: Application
  applicationFile: app.yaml
"#;
        let spec: CustomPackageSpec = serde_yaml::from_str(yaml).expect("should deserialize");
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("gitServerURL").is_some());
        assert!(value.get("internalGitServerURL").is_some());
        assert!(value.get("gitServerUrl").is_none());
    }

    #[test]
    fn replicate_defaults_to_false() {
        let yaml = r#"
gitServerURL: https://gitea.example.com:8443
internalGitServerURL: http://gitea.gitea.svc.cluster.local:3000
gitServerAuthSecretRef:
  name: gitea-credential
  namespace: gitea
argoCD:
  name: my-app
  namespace: argocd
  type: ApplicationSet
  applicationFile: /packages/my-app/appset.yaml
"#;
        let spec: CustomPackageSpec = serde_yaml::from_str(yaml).expect("should deserialize");
        assert!(!spec.replicate);
        assert!(spec.remote_repository.is_none());
        assert_eq!(spec.argo_cd.r#type.kind(), "ApplicationSet");
    }
}
