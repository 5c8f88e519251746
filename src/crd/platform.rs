//! Platform CRD
//!
//! The top-level resource created by `adhar up`. Its reconciler bootstraps
//! the three core packages in dependency order and records each package's
//! availability on status, exactly once.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::{default_false, Condition, ProviderName};

/// Platform Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Platform",
    group = "platform.adhar.io",
    version = "v1alpha1",
    namespaced,
    status = "PlatformStatus",
    printcolumn = r#"{"name":"Gitea", "type":"boolean", "jsonPath":".status.giteaAvailable"}"#,
    printcolumn = r#"{"name":"Nginx", "type":"boolean", "jsonPath":".status.nginxAvailable"}"#,
    printcolumn = r#"{"name":"ArgoCD", "type":"boolean", "jsonPath":".status.argocdAvailable"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Git provider backing the platform repositories
    pub git_provider: ProviderName,
    /// Scheme used for ingress URLs (http or https)
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Base host the platform is reachable on
    #[serde(default = "default_host")]
    pub host: String,
    /// Ingress port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route core services by path instead of subdomain
    #[serde(default = "default_false")]
    pub use_path_routing: bool,
    /// Use the well-known development password instead of a generated one
    #[serde(default = "default_false")]
    pub static_password: bool,
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_host() -> String {
    "adhar.localtest.me".to_string()
}

fn default_port() -> u16 {
    8443
}

/// Status of the Platform resource
///
/// Each availability flag is set exactly once, after the package's monitored
/// Deployment is observed Ready.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(default)]
    pub gitea_available: bool,
    #[serde(default)]
    pub nginx_available: bool,
    #[serde(default)]
    pub argocd_available: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl PlatformStatus {
    /// All core packages installed and ready.
    pub fn all_available(&self) -> bool {
        self.gitea_available && self.nginx_available && self.argocd_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply() {
        let spec: PlatformSpec = serde_yaml::from_str("gitProvider: gitea").unwrap();
        assert_eq!(spec.git_provider, ProviderName::Gitea);
        assert_eq!(spec.protocol, "https");
        assert_eq!(spec.host, "adhar.localtest.me");
        assert_eq!(spec.port, 8443);
        assert!(!spec.use_path_routing);
        assert!(!spec.static_password);
    }

    #[test]
    fn all_available_requires_every_package() {
        let mut status = PlatformStatus {
            gitea_available: true,
            nginx_available: true,
            ..Default::default()
        };
        assert!(!status.all_available());
        status.argocd_available = true;
        assert!(status.all_available());
    }
}
