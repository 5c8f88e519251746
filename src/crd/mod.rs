//! # Custom Resource Definitions
//!
//! CRD types for the `platform.adhar.io/v1alpha1` API group:
//!
//! - `GitRepository` - a repository on the managed git server whose content
//!   is driven from an embedded package, a local directory, or a remote clone
//! - `CustomPackage` - an external GitOps package expanded into child
//!   `GitRepository` objects plus an ArgoCD registration
//! - `Platform` - the top-level resource tracking core package installation

mod custom_package;
mod git_repository;
mod platform;

pub use custom_package::{
    ArgoCdPackageSpec, ArgoCdResourceType, CustomPackage, CustomPackageSpec, CustomPackageStatus,
    ObjectRef,
};
pub use git_repository::{
    CommitStatus, EmbeddedPackage, GitProviderSpec, GitRepository, GitRepositorySource,
    GitRepositorySpec, GitRepositoryStatus, PackageCustomization, ProviderName,
    RemoteRepositorySpec, SecretReference,
};
pub use platform::{Platform, PlatformSpec, PlatformStatus};

use serde::{Deserialize, Serialize};

/// Condition represents a status condition for a resource.
///
/// Used to surface terminal validation failures and readiness state so that
/// stuck objects are diagnosable from `kubectl get -o yaml` alone.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. "Ready")
    pub r#type: String,
    /// Status of condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn ready(reason: &str, message: &str) -> Self {
        Self::new("Ready", "True", reason, message)
    }

    pub fn not_ready(reason: &str, message: &str) -> Self {
        Self::new("Ready", "False", reason, message)
    }

    fn new(r#type: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

pub fn default_true() -> bool {
    true
}

pub fn default_false() -> bool {
    false
}

/// Annotation that triggers an immediate reconcile when patched by the CLI.
pub const RECONCILE_ANNOTATION: &str = "platform.adhar.io/reconcile";
