use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use pkg_types::object::ObjectKind;

/// Identity of one failing object. Pods carry the container that failed;
/// workloads and machines have no container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BadObjectKey {
    pub namespace: String,
    pub name: String,
    pub container: Option<String>,
}

impl BadObjectKey {
    pub fn new(namespace: &str, name: &str, container: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            container: container.map(str::to_string),
        }
    }
}

/// `ns/name/container`, `ns/name` without a container, `name` when cluster-scoped.
impl fmt::Display for BadObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}/", self.namespace)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(c) = &self.container {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadObject {
    pub kind: ObjectKind,
    pub reason: String,
    /// Container images of the failing object, kept for reporting.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Objects failing readiness at one tick, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadObjectSet(BTreeMap<BadObjectKey, BadObject>);

impl BadObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: BadObjectKey, object: BadObject) {
        self.0.insert(key, object);
    }

    pub fn get(&self, key: &BadObjectKey) -> Option<&BadObject> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BadObjectKey, &BadObject)> {
        self.0.iter()
    }

    /// Display key -> reason, e.g. `{"default/app-1/app": "ImagePullBackOff"}`.
    pub fn reasons(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.to_string(), v.reason.clone()))
            .collect()
    }
}

impl fmt::Display for BadObjectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, bad) in &self.0 {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{} {}: {}", bad.kind, key, bad.reason)?;
            if !bad.images.is_empty() {
                write!(f, " (images: {})", bad.images.join(", "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        assert_eq!(
            BadObjectKey::new("default", "app-1", Some("app")).to_string(),
            "default/app-1/app"
        );
        assert_eq!(
            BadObjectKey::new("kube-system", "cilium", None).to_string(),
            "kube-system/cilium"
        );
        assert_eq!(BadObjectKey::new("", "m-1", None).to_string(), "m-1");
    }

    #[test]
    fn set_display_lists_images() {
        let mut set = BadObjectSet::new();
        set.insert(
            BadObjectKey::new("default", "app-1", Some("app")),
            BadObject {
                kind: ObjectKind::Pod,
                reason: "ErrImagePull".to_string(),
                images: vec!["nginx:bad".to_string()],
            },
        );
        assert_eq!(
            set.to_string(),
            "Pod default/app-1/app: ErrImagePull (images: nginx:bad)"
        );
    }
}
