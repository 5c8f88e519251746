//! # Manifest Renderer
//!
//! Turns a manifest source (an embedded core package or a directory of
//! user-supplied YAML) plus a fixed [`TemplateData`] struct into typed
//! Kubernetes objects, optionally merged with a single customization file.

pub mod embedded;
pub mod merge;
pub mod render;

pub use render::TemplateData;

use std::path::{Path, PathBuf};

use kube::core::DynamicObject;

use crate::crd::EmbeddedPackage;
use crate::error::{Error, Result};

/// Where manifest templates come from.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    Embedded(EmbeddedPackage),
    Directory(PathBuf),
}

/// Render a manifest source into typed objects, merging an optional
/// customization file over the base set.
pub fn render(
    source: &ManifestSource,
    data: &TemplateData,
    customization: Option<&Path>,
) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for (name, template) in source_templates(source)? {
        let mut rendered = render::render_objects(&template, data)
            .map_err(|e| Error::Render(format!("{name}: {e}")))?;
        objects.append(&mut rendered);
    }

    if let Some(path) = customization {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Render(format!("customization {}: {e}", path.display())))?;
        let custom = render::decode_objects(&content)
            .map_err(|e| Error::Render(format!("customization {}: {e}", path.display())))?;
        objects = merge::merge_customization(objects, custom)?;
    }

    Ok(objects)
}

fn source_templates(source: &ManifestSource) -> Result<Vec<(String, String)>> {
    match source {
        ManifestSource::Embedded(package) => Ok(embedded::templates(*package)
            .iter()
            .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
            .collect()),
        ManifestSource::Directory(dir) => {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
                .map_err(|e| Error::Render(format!("read {}: {e}", dir.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml")
                    )
                })
                .collect();
            entries.sort();
            entries
                .into_iter()
                .map(|path| {
                    let content = std::fs::read_to_string(&path)
                        .map_err(|e| Error::Render(format!("read {}: {e}", path.display())))?;
                    Ok((path.display().to_string(), content))
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_packages_render_to_objects() {
        let data = TemplateData::new("https", "adhar.localtest.me", 8443, false);
        for package in [
            EmbeddedPackage::Argocd,
            EmbeddedPackage::Gitea,
            EmbeddedPackage::Nginx,
        ] {
            let objects = render(&ManifestSource::Embedded(package), &data, None).unwrap();
            assert!(!objects.is_empty(), "{package:?} rendered no objects");
            // Each package ships its own namespace first.
            assert_eq!(objects[0].types.as_ref().unwrap().kind, "Namespace");
        }
    }

    #[test]
    fn directory_sources_render_sorted_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not yaml").unwrap();

        let data = TemplateData::new("http", "localhost", 8080, false);
        let objects = render(
            &ManifestSource::Directory(dir.path().to_path_buf()),
            &data,
            None,
        )
        .unwrap();
        let names: Vec<_> = objects
            .iter()
            .map(|o| o.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn customization_file_is_merged_over_base() {
        let dir = tempfile::tempdir().unwrap();
        let custom_path = dir.path().join("custom.yaml");
        std::fs::write(
            &custom_path,
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: gitea
  namespace: gitea
spec:
  replicas: 3
"#,
        )
        .unwrap();

        let data = TemplateData::new("https", "adhar.localtest.me", 8443, false);
        let objects = render(
            &ManifestSource::Embedded(EmbeddedPackage::Gitea),
            &data,
            Some(&custom_path),
        )
        .unwrap();
        let deployment = objects
            .iter()
            .find(|o| o.types.as_ref().unwrap().kind == "Deployment")
            .unwrap();
        let value = serde_json::to_value(deployment).unwrap();
        assert_eq!(value["spec"]["replicas"], 3);
    }
}
