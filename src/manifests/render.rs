//! Template rendering and YAML decoding.
//!
//! Templates may only use the fixed fields of [`TemplateData`]; there are no
//! user-defined template variables. Decode failures on any document are fatal
//! for the reconcile pass, nothing is partially applied.

use handlebars::Handlebars;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The fixed set of values available to manifest templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateData {
    pub protocol: String,
    pub host: String,
    pub ingress_host: String,
    pub port: u16,
    pub use_path_routing: bool,
    pub static_password: bool,
}

impl TemplateData {
    pub fn new(protocol: &str, host: &str, port: u16, use_path_routing: bool) -> Self {
        Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            ingress_host: host.to_string(),
            port,
            use_path_routing,
            static_password: false,
        }
    }
}

/// Substitute template data into a single template string.
pub fn render_str(template: &str, data: &TemplateData) -> Result<String> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .render_template(template, data)
        .map_err(|e| Error::Render(e.to_string()))
}

/// Decode a (possibly multi-document) YAML string into typed objects.
/// Documents must carry `apiVersion`, `kind` and `metadata.name`.
pub fn decode_objects(yaml: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_json::Value::deserialize(document)
            .map_err(|e| Error::Render(format!("invalid YAML document: {e}")))?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::Render(format!("not a Kubernetes object: {e}")))?;
        if object.types.is_none() {
            return Err(Error::Render(
                "document is missing apiVersion/kind".to_string(),
            ));
        }
        if object.metadata.name.is_none() {
            return Err(Error::Render("document is missing metadata.name".to_string()));
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Render one template and decode the result.
pub fn render_objects(template: &str, data: &TemplateData) -> Result<Vec<DynamicObject>> {
    decode_objects(&render_str(template, data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> TemplateData {
        TemplateData::new("https", "adhar.localtest.me", 8443, false)
    }

    #[test]
    fn renders_fixed_fields() {
        let out = render_str("{{protocol}}://gitea.{{host}}:{{port}}", &data()).unwrap();
        assert_eq!(out, "https://gitea.adhar.localtest.me:8443");
    }

    #[test]
    fn path_routing_flag_switches_branches() {
        let tpl = "{{#if usePathRouting}}/gitea{{else}}/{{/if}}";
        assert_eq!(render_str(tpl, &data()).unwrap(), "/");
        let mut routed = data();
        routed.use_path_routing = true;
        assert_eq!(render_str(tpl, &routed).unwrap(), "/gitea");
    }

    #[test]
    fn unknown_variables_are_render_errors() {
        let err = render_str("{{noSuchField}}", &data()).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn decodes_multi_document_yaml() {
        let yaml = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: gitea
---
apiVersion: v1
kind: Service
metadata:
  name: gitea
  namespace: gitea
"#;
        let objects = decode_objects(yaml).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].types.as_ref().unwrap().kind, "Service");
    }

    #[test]
    fn missing_kind_is_a_decode_error() {
        let err = decode_objects("metadata:\n  name: x\n").unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn empty_documents_are_skipped() {
        let objects = decode_objects("---\n---\n").unwrap();
        assert!(objects.is_empty());
    }
}
