use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use pkg_poll::ConditionError;
use pkg_types::fields::{self, FieldError};
use pkg_types::object::{ObjectId, ObjectKind, ObservedObject};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict on {key}: resource version {given} is stale (current {current})")]
    Conflict { key: String, given: u64, current: u64 },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("transient API error: {0}")]
    Transient(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("background update of {object} failed: {reason}")]
    Background { object: String, reason: String },
}

impl ApiError {
    /// Not-found, conflicts and transient failures may clear up on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::NotFound(_) | ApiError::Conflict { .. } | ApiError::Transient(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

impl From<ApiError> for ConditionError {
    fn from(err: ApiError) -> Self {
        if err.is_retryable() {
            ConditionError::Retryable(err.into())
        } else {
            ConditionError::Fatal(err.into())
        }
    }
}

impl From<FieldError> for ApiError {
    fn from(err: FieldError) -> Self {
        ApiError::Invalid(err.to_string())
    }
}

// --- Stored object ---

/// An object as held by the API: identity, version and raw JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: ObjectId,
    pub uid: String,
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
    pub body: Value,
}

impl StoredObject {
    pub fn observe(&self) -> Result<ObservedObject, FieldError> {
        ObservedObject::from_value(self.id.kind, &self.body)
    }

    pub fn field(&self, path: &str) -> Result<Option<&Value>, FieldError> {
        fields::lookup(&self.body, path)
    }

    pub fn labels(&self) -> Result<BTreeMap<String, String>, FieldError> {
        fields::get_string_map(&self.body, "metadata.labels")
    }

    pub fn finalizers(&self) -> Result<Vec<String>, FieldError> {
        Ok(fields::get_array(&self.body, "metadata.finalizers")?
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self.field("metadata.deletionTimestamp"), Ok(Some(_)))
    }

    /// Set a dotted-path field, creating intermediate objects.
    pub fn set_field(&mut self, path: &str, value: Value) -> Result<(), ApiError> {
        set_path(&mut self.body, path, value)
    }
}

pub(crate) fn set_path(body: &mut Value, path: &str, value: Value) -> Result<(), ApiError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments
        .pop()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Invalid(format!("empty field path '{}'", path)))?;

    let mut current = body;
    for (i, segment) in segments.iter().enumerate() {
        let Value::Object(map) = current else {
            return Err(ApiError::Invalid(format!(
                "cannot set {}: '{}' is not an object",
                path,
                segments[..i].join(".")
            )));
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(ApiError::Invalid(format!(
            "cannot set {}: parent is not an object",
            path
        ))),
    }
}

// --- List filter ---

/// Label and field equality filter for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Dotted path -> expected string value, e.g. `spec.clusterName`.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field(mut self, path: &str, value: &str) -> Self {
        self.fields.insert(path.to_string(), value.to_string());
        self
    }

    /// Objects with malformed labels or fields never match.
    pub fn matches(&self, object: &StoredObject) -> bool {
        if !self.labels.is_empty() {
            let Ok(labels) = object.labels() else {
                return false;
            };
            if !self.labels.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                return false;
            }
        }
        self.fields.iter().all(|(path, expected)| {
            matches!(fields::get_str(&object.body, path), Ok(Some(v)) if v == expected)
        })
    }
}

// --- Object API ---

/// Typed access to cluster objects with optimistic concurrency.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Objects of `kind`, optionally restricted to one namespace, in key order.
    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        filter: &ListFilter,
    ) -> Result<Vec<StoredObject>, ApiError>;

    async fn get(&self, id: &ObjectId) -> Result<StoredObject, ApiError>;

    async fn create(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> Result<StoredObject, ApiError>;

    /// Replace an object. Fails with [`ApiError::Conflict`] when
    /// `object.resource_version` is not the current version.
    async fn update(&self, object: &StoredObject) -> Result<StoredObject, ApiError>;

    /// Delete an object. Objects with finalizers are only marked for
    /// deletion until their finalizers are removed.
    async fn delete(&self, id: &ObjectId) -> Result<(), ApiError>;
}
