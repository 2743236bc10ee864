//! Deterministic short digest of a Pod template, used by the Deployment
//! controller to decide whether a new ReplicaSet is needed. `serde_json`
//! does not guarantee map key order, so the template is first re-encoded
//! into a key-sorted `serde_json::Value` before hashing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use kos_core::kinds::workloads::PodTemplateSpec;
use serde_json::Value;

pub fn template_hash(template: &PodTemplateSpec) -> String {
    let value = serde_json::to_value(template).expect("PodTemplateSpec always serializes");
    let canonical = canonicalize(&value);
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys.iter().map(|k| format!("{k:?}:{}", canonicalize(&map[*k]))).collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_templates_with_different_label_insertion_order_hash_equal() {
        let mut a = PodTemplateSpec::default();
        a.labels.insert("app".into(), "web".into());
        a.labels.insert("tier".into(), "frontend".into());

        let mut b = PodTemplateSpec::default();
        b.labels.insert("tier".into(), "frontend".into());
        b.labels.insert("app".into(), "web".into());

        assert_eq!(template_hash(&a), template_hash(&b));
    }

    #[test]
    fn different_templates_hash_differently() {
        let a = PodTemplateSpec::default();
        let mut b = PodTemplateSpec::default();
        b.labels.insert("app".into(), "web".into());

        assert_ne!(template_hash(&a), template_hash(&b));
    }
}
