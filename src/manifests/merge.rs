//! Customization merge.
//!
//! A single user-supplied manifest file can override rendered core-package
//! output. Objects are matched by GroupVersionKind + namespace + name;
//! matching objects are merged field-by-field with the customization taking
//! precedence, objects without a base counterpart are appended.

use kube::core::DynamicObject;
use serde_json::Value;

use crate::error::{Error, Result};

/// Merge customization objects over the rendered base set.
pub fn merge_customization(
    base: Vec<DynamicObject>,
    customization: Vec<DynamicObject>,
) -> Result<Vec<DynamicObject>> {
    let mut merged = base;
    for custom in customization {
        let key = identity(&custom);
        match merged.iter_mut().find(|obj| identity(obj) == key) {
            Some(existing) => {
                let mut base_value = serde_json::to_value(&*existing)?;
                let custom_value = serde_json::to_value(&custom)?;
                deep_merge(&mut base_value, &custom_value);
                *existing = serde_json::from_value(base_value)
                    .map_err(|e| Error::Render(format!("merged object is invalid: {e}")))?;
            }
            None => merged.push(custom),
        }
    }
    Ok(merged)
}

/// Identity of an object: apiVersion + kind + namespace + name.
fn identity(obj: &DynamicObject) -> (String, String, Option<String>, Option<String>) {
    let (api_version, kind) = obj
        .types
        .as_ref()
        .map(|t| (t.api_version.clone(), t.kind.clone()))
        .unwrap_or_default();
    (
        api_version,
        kind,
        obj.metadata.namespace.clone(),
        obj.metadata.name.clone(),
    )
}

/// Recursive merge: maps merge per key, everything else (scalars, arrays) is
/// replaced by the overlay. Null overlay values delete the base field.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    base_map.remove(key);
                } else if let Some(base_value) = base_map.get_mut(key) {
                    deep_merge(base_value, overlay_value);
                } else {
                    base_map.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::render::decode_objects;

    const BASE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: gitea
  namespace: gitea
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: gitea
          image: docker.io/gitea/gitea:1.22.3-rootless
"#;

    #[test]
    fn customization_fields_win_absent_fields_retain_base() {
        let base = decode_objects(BASE).unwrap();
        let custom = decode_objects(
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

        let merged = merge_customization(base, custom).unwrap();
        assert_eq!(merged.len(), 1);
        let value = serde_json::to_value(&merged[0]).unwrap();
        assert_eq!(value["spec"]["replicas"], 3);
        // Fields absent from the customization keep base values.
        assert_eq!(
            value["spec"]["template"]["spec"]["containers"][0]["image"],
            "docker.io/gitea/gitea:1.22.3-rootless"
        );
    }

    #[test]
    fn unmatched_customization_objects_are_appended() {
        let base = decode_objects(BASE).unwrap();
        let custom = decode_objects(
            r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: extra
  namespace: gitea
data:
  key: value
"#,
        )
        .unwrap();
        let merged = merge_customization(base, custom).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn identity_distinguishes_namespace() {
        let base = decode_objects(BASE).unwrap();
        let custom = decode_objects(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: gitea
  namespace: other
spec:
  replicas: 5
"#,
        )
        .unwrap();
        let merged = merge_customization(base, custom).unwrap();
        // Different namespace, so no merge happened.
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let mut base = serde_json::json!({"list": [1, 2, 3], "keep": true});
        let overlay = serde_json::json!({"list": [9]});
        deep_merge(&mut base, &overlay);
        assert_eq!(base["list"], serde_json::json!([9]));
        assert_eq!(base["keep"], true);
    }
}
