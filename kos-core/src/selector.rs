use std::collections::HashMap;

/// Subset-match a selector against an object's labels: every key/value pair
/// in `selector` must be present and equal in `labels`. An empty selector
/// matches nothing by convention of the callers in this crate (Services and
/// controllers always carry a non-empty selector); use
/// [`matches_nonempty`] to make that explicit at call sites that need it.
pub fn matches(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|lv| lv == v).unwrap_or(false))
}

pub fn matches_nonempty(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    !selector.is_empty() && matches(selector, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn subset_match() {
        let selector = map(&[("app", "nginx")]);
        let labels = map(&[("app", "nginx"), ("tier", "frontend")]);
        assert!(matches(&selector, &labels));
    }

    #[test]
    fn missing_key_fails() {
        let selector = map(&[("app", "nginx"), ("tier", "frontend")]);
        let labels = map(&[("app", "nginx")]);
        assert!(!matches(&selector, &labels));
    }

    #[test]
    fn empty_selector_matches_everything_but_not_nonempty_variant() {
        let selector = HashMap::new();
        let labels = map(&[("app", "nginx")]);
        assert!(matches(&selector, &labels));
        assert!(!matches_nonempty(&selector, &labels));
    }
}
