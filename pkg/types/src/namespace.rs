use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::quota::QuotaLimit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    /// Owning project, if the namespace has been assigned to one.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Namespace {
    pub fn new(name: &str, project: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            project: project.map(str::to_string),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }
}

/// A group of namespaces sharing one quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Aggregate limit across all member namespaces.
    #[serde(default)]
    pub resource_quota: Option<QuotaLimit>,
    /// Limit provisioned into each member namespace unless overridden.
    #[serde(default)]
    pub namespace_default_quota: Option<QuotaLimit>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resource_quota: None,
            namespace_default_quota: None,
            created_at: Utc::now(),
        }
    }

    /// A project enforces quota when it carries a non-empty project limit.
    pub fn has_quota(&self) -> bool {
        self.resource_quota.as_ref().is_some_and(|q| !q.is_empty())
    }
}
