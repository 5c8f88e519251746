//! Compile-time-embedded manifest templates for the three core packages.

use crate::crd::EmbeddedPackage;

/// Template files for a core package, in apply order.
pub fn templates(package: EmbeddedPackage) -> &'static [(&'static str, &'static str)] {
    match package {
        EmbeddedPackage::Argocd => &[
            (
                "namespace.yaml",
                include_str!("../../manifests/argocd/namespace.yaml"),
            ),
            (
                "configmap.yaml",
                include_str!("../../manifests/argocd/configmap.yaml"),
            ),
            (
                "deployment.yaml",
                include_str!("../../manifests/argocd/deployment.yaml"),
            ),
            (
                "service.yaml",
                include_str!("../../manifests/argocd/service.yaml"),
            ),
            (
                "ingress.yaml",
                include_str!("../../manifests/argocd/ingress.yaml"),
            ),
        ],
        EmbeddedPackage::Gitea => &[
            (
                "namespace.yaml",
                include_str!("../../manifests/gitea/namespace.yaml"),
            ),
            (
                "deployment.yaml",
                include_str!("../../manifests/gitea/deployment.yaml"),
            ),
            (
                "service.yaml",
                include_str!("../../manifests/gitea/service.yaml"),
            ),
            (
                "ingress.yaml",
                include_str!("../../manifests/gitea/ingress.yaml"),
            ),
        ],
        EmbeddedPackage::Nginx => &[
            (
                "namespace.yaml",
                include_str!("../../manifests/nginx/namespace.yaml"),
            ),
            (
                "deployment.yaml",
                include_str!("../../manifests/nginx/deployment.yaml"),
            ),
            (
                "service.yaml",
                include_str!("../../manifests/nginx/service.yaml"),
            ),
        ],
    }
}

/// Namespace and Deployment watched for readiness after applying a package.
pub fn monitored_deployment(package: EmbeddedPackage) -> (&'static str, &'static str) {
    match package {
        EmbeddedPackage::Argocd => ("argocd", "argocd-server"),
        EmbeddedPackage::Gitea => ("gitea", "gitea"),
        EmbeddedPackage::Nginx => ("ingress-nginx", "ingress-nginx-controller"),
    }
}
