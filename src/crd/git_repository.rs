//! GitRepository CRD
//!
//! A `GitRepository` describes one repository on the backing git provider and
//! where its content comes from. The reconciler provisions the provider-side
//! repository, pushes the resolved source tree, and publishes clone URLs and
//! the last pushed commit on status.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::{default_false, Condition};

/// GitRepository Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: platform.adhar.io/v1alpha1
/// kind: GitRepository
/// metadata:
///   name: argocd
///   namespace: adhar-system
/// spec:
///   provider:
///     name: gitea
///     gitURL: https://gitea.adhar.localtest.me:8443
///     internalGitURL: http://gitea.gitea.svc.cluster.local:3000
///     organizationName: adhar
///   source:
///     type: embedded
///     name: argocd
///   secretRef:
///     name: gitea-credential
///     namespace: gitea
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "GitRepository",
    group = "platform.adhar.io",
    version = "v1alpha1",
    namespaced,
    status = "GitRepositoryStatus",
    printcolumn = r#"{"name":"Synced", "type":"boolean", "jsonPath":".status.synced"}"#,
    printcolumn = r#"{"name":"Commit", "type":"string", "jsonPath":".status.commit.hash"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositorySpec {
    /// Backing git host and organization. Treated as immutable in practice:
    /// there is no migration path between providers.
    pub provider: GitProviderSpec,
    /// Where the repository content comes from
    pub source: GitRepositorySource,
    /// Secret holding git credentials (`username` / `password` keys)
    #[serde(default)]
    pub secret_ref: Option<SecretReference>,
    /// Optional single-file customization merged over rendered core-package
    /// manifests
    #[serde(default)]
    pub customization: Option<PackageCustomization>,
}

/// Identifies the backing git host and organization
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitProviderSpec {
    /// Provider backing this repository
    pub name: ProviderName,
    /// External (ingress) base URL of the git server
    #[serde(rename = "gitURL")]
    pub git_url: String,
    /// Cluster-local base URL of the git server
    #[serde(default, rename = "internalGitURL")]
    pub internal_git_url: Option<String>,
    /// Organization owning the repository
    pub organization_name: String,
}

/// Supported git providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Gitea,
    Github,
}

/// Source of the repository content
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum GitRepositorySource {
    /// One of the built-in core packages (argocd, gitea, nginx)
    Embedded {
        /// Core package name
        name: EmbeddedPackage,
    },
    /// Absolute path to a directory of manifests on the controller's
    /// filesystem
    Local {
        /// Directory to push as repository content
        path: String,
    },
    /// Remote repository cloned into a scratch directory
    Remote(RemoteRepositorySpec),
}

// A structural schema cannot express the per-variant field requirements of a
// discriminated union (each branch would redefine the `type` property), so
// the CRD carries one flat object schema and the reconciler validates
// variant fields at decode time.
impl schemars::JsonSchema for GitRepositorySource {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "GitRepositorySource".into()
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "object",
            "description": "Source of the repository content, discriminated by `type`",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["embedded", "local", "remote"],
                    "description": "Source kind"
                },
                "name": {
                    "type": "string",
                    "description": "Core package name (embedded sources)"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to push (local sources) or subdirectory of the upstream tree (remote sources)"
                },
                "url": {
                    "type": "string",
                    "description": "Clone URL of the upstream repository (remote sources)"
                },
                "ref": {
                    "type": "string",
                    "description": "Branch, tag or commit to check out (remote sources)"
                },
                "cloneSubmodules": {
                    "type": "boolean",
                    "description": "Whether to clone submodules as well (remote sources)"
                }
            },
            "required": ["type"]
        })
    }
}

/// The three built-in core packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddedPackage {
    Argocd,
    Gitea,
    Nginx,
}

impl EmbeddedPackage {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddedPackage::Argocd => "argocd",
            EmbeddedPackage::Gitea => "gitea",
            EmbeddedPackage::Nginx => "nginx",
        }
    }
}

/// Upstream repository to mirror
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepositorySpec {
    /// Clone URL of the upstream repository
    pub url: String,
    /// Branch, tag or commit to check out
    pub r#ref: String,
    /// Subdirectory of the upstream tree to use ("." for the whole tree)
    #[serde(default = "default_path")]
    pub path: String,
    /// Whether to clone submodules as well
    #[serde(default = "default_false")]
    pub clone_submodules: bool,
}

fn default_path() -> String {
    ".".to_string()
}

/// Namespaced reference to a Secret
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Single-file customization for a core package
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageCustomization {
    /// Core package the customization applies to
    pub name: String,
    /// Path to a manifest file merged over the rendered base set
    pub file_path: String,
}

/// Status of a GitRepository
///
/// `synced: true` means the repository content at
/// `internalGitRepositoryUrl` matches the most recent resolved source as of
/// `commit.hash`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositoryStatus {
    /// Whether provider-side content matches the resolved source
    #[serde(default)]
    pub synced: bool,
    /// Last pushed commit
    #[serde(default)]
    pub commit: CommitStatus,
    /// Cluster-local clone URL
    #[serde(default)]
    pub internal_git_repository_url: Option<String>,
    /// External (ingress) clone URL
    #[serde(default)]
    pub external_git_repository_url: Option<String>,
    /// Source subpath that was pushed
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatus {
    /// Content hash of the last pushed tree
    #[serde(default)]
    pub hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_source_deserializes_from_tagged_yaml() {
        let yaml = r#"
type: embedded
name: argocd
"#;
        let source: GitRepositorySource = serde_yaml::from_str(yaml).expect("should deserialize");
        match source {
            GitRepositorySource::Embedded { name } => assert_eq!(name, EmbeddedPackage::Argocd),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn remote_source_defaults_path_and_submodules() {
        let yaml = r#"
type: remote
url: https://example.com/repo.git
ref: main
"#;
        let source: GitRepositorySource = serde_yaml::from_str(yaml).expect("should deserialize");
        match source {
            GitRepositorySource::Remote(remote) => {
                assert_eq!(remote.url, "https://example.com/repo.git");
                assert_eq!(remote.r#ref, "main");
                assert_eq!(remote.path, ".");
                assert!(!remote.clone_submodules);
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn provider_spec_uses_uppercase_url_keys() {
        let spec = GitProviderSpec {
            name: ProviderName::Gitea,
            git_url: "https://gitea.example.com".to_string(),
            internal_git_url: Some("http://gitea.gitea.svc.cluster.local:3000".to_string()),
            organization_name: "adhar".to_string(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("gitURL").is_some());
        assert!(value.get("internalGitURL").is_some());
        assert!(value.get("gitUrl").is_none());
    }

    #[test]
    fn provider_name_uses_lowercase_wire_form() {
        assert_eq!(
            serde_json::to_string(&ProviderName::Gitea).unwrap(),
            "\"gitea\""
        );
        assert_eq!(
            serde_json::to_string(&ProviderName::Github).unwrap(),
            "\"github\""
        );
    }
}
