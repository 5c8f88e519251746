//! # Render and Merge Tests
//!
//! End-to-end tests for manifest rendering: embedded package templates,
//! directory sources, template data substitution, and customization merging.

use std::io::Write;

use platform_controller::crd::EmbeddedPackage;
use platform_controller::manifests::{self, ManifestSource, TemplateData};

fn data() -> TemplateData {
    TemplateData::new("https", "adhar.localtest.me", 8443, false)
}

#[test]
fn test_every_embedded_package_renders() {
    for package in [
        EmbeddedPackage::Argocd,
        EmbeddedPackage::Gitea,
        EmbeddedPackage::Nginx,
    ] {
        let objects = manifests::render(&ManifestSource::Embedded(package), &data(), None)
            .unwrap_or_else(|e| panic!("{package:?} failed to render: {e}"));
        assert!(!objects.is_empty(), "{package:?} rendered no objects");
        // Every core package ships its own Namespace and Deployment.
        let kinds: Vec<String> = objects
            .iter()
            .filter_map(|o| o.types.as_ref().map(|t| t.kind.clone()))
            .collect();
        assert!(kinds.contains(&"Namespace".to_string()), "{package:?}: {kinds:?}");
        assert!(kinds.contains(&"Deployment".to_string()), "{package:?}: {kinds:?}");
    }
}

#[test]
fn test_rendered_objects_carry_template_values() {
    let objects = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Gitea),
        &data(),
        None,
    )
    .expect("gitea should render");

    let rendered = serde_json::to_string(&objects).expect("serializable");
    assert!(
        rendered.contains("adhar.localtest.me"),
        "host placeholder was not substituted"
    );
    assert!(
        !rendered.contains("{{"),
        "unsubstituted template variables remain"
    );
}

#[test]
fn test_path_routing_changes_rendered_urls() {
    let subdomain = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Argocd),
        &TemplateData::new("https", "adhar.localtest.me", 8443, false),
        None,
    )
    .expect("render");
    let path_routed = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Argocd),
        &TemplateData::new("https", "adhar.localtest.me", 8443, true),
        None,
    )
    .expect("render");

    let a = serde_json::to_string(&subdomain).expect("serialize");
    let b = serde_json::to_string(&path_routed).expect("serialize");
    assert_ne!(a, b, "path routing must change the rendered output");
}

#[test]
fn test_directory_source_renders_in_sorted_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, kind) in [("b.yaml", "ConfigMap"), ("a.yaml", "Namespace")] {
        let mut file = std::fs::File::create(dir.path().join(name)).expect("create");
        writeln!(
            file,
            "apiVersion: v1\nkind: {kind}\nmetadata:\n  name: {}",
            name.trim_end_matches(".yaml")
        )
        .expect("write");
    }
    // Non-YAML files are ignored.
    std::fs::write(dir.path().join("notes.txt"), "ignore me").expect("write");

    let objects = manifests::render(
        &ManifestSource::Directory(dir.path().to_path_buf()),
        &data(),
        None,
    )
    .expect("directory should render");

    let kinds: Vec<&str> = objects
        .iter()
        .filter_map(|o| o.types.as_ref().map(|t| t.kind.as_str()))
        .collect();
    assert_eq!(kinds, vec!["Namespace", "ConfigMap"]);
}

#[test]
fn test_customization_overrides_matching_object() {
    let customization = tempfile::NamedTempFile::with_suffix(".yaml").expect("tempfile");
    std::fs::write(
        customization.path(),
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
    .expect("write");

    let objects = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Gitea),
        &data(),
        Some(customization.path()),
    )
    .expect("customized render");

    let deployment = objects
        .iter()
        .find(|o| {
            o.types.as_ref().map(|t| t.kind.as_str()) == Some("Deployment")
                && o.metadata.name.as_deref() == Some("gitea")
        })
        .expect("gitea deployment present");
    let value = serde_json::to_value(deployment).expect("serialize");
    assert_eq!(value["spec"]["replicas"], 3, "customization must win");
    // The base image field survives the merge untouched.
    assert!(value["spec"]["template"]["spec"]["containers"][0]["image"]
        .as_str()
        .is_some_and(|image| image.contains("gitea")));
}

#[test]
fn test_customization_appends_unmatched_objects() {
    let customization = tempfile::NamedTempFile::with_suffix(".yaml").expect("tempfile");
    std::fs::write(
        customization.path(),
        r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: extra-config
  namespace: gitea
data:
  key: value
"#,
    )
    .expect("write");

    let base_count = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Gitea),
        &data(),
        None,
    )
    .expect("render")
    .len();
    let objects = manifests::render(
        &ManifestSource::Embedded(EmbeddedPackage::Gitea),
        &data(),
        Some(customization.path()),
    )
    .expect("customized render");

    assert_eq!(objects.len(), base_count + 1);
    assert!(objects
        .iter()
        .any(|o| o.metadata.name.as_deref() == Some("extra-config")));
}
