use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pkg_constants::paths::REGISTRY_PREFIX;
use pkg_types::object::{ObjectId, ObjectKind};

use crate::api::{ApiError, ListFilter, ObjectApi, StoredObject, set_path};

/// `/registry/<kind>/<namespace>/<name>`, or `/registry/<kind>/<name>` for
/// cluster-scoped objects.
pub fn registry_key(id: &ObjectId) -> String {
    if id.namespace.is_empty() {
        format!("{}{}/{}", REGISTRY_PREFIX, id.kind.plural(), id.name)
    } else {
        format!(
            "{}{}/{}/{}",
            REGISTRY_PREFIX,
            id.kind.plural(),
            id.namespace,
            id.name
        )
    }
}

fn list_prefix(kind: ObjectKind, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}{}/{}/", REGISTRY_PREFIX, kind.plural(), ns),
        _ => format!("{}{}/", REGISTRY_PREFIX, kind.plural()),
    }
}

/// Write identity and version into the body's `metadata`.
fn stamp_metadata(body: &mut Value, id: &ObjectId, uid: &str, resource_version: u64) -> Result<(), ApiError> {
    if body.is_null() {
        *body = Value::Object(Map::new());
    }
    if !body.is_object() {
        return Err(ApiError::Invalid(format!("body of {} must be a JSON object", id)));
    }
    set_path(body, "metadata.name", json!(id.name))?;
    if !id.namespace.is_empty() {
        set_path(body, "metadata.namespace", json!(id.namespace))?;
    }
    set_path(body, "metadata.uid", json!(uid))?;
    set_path(body, "metadata.resourceVersion", json!(resource_version.to_string()))
}

const PATCH_ATTEMPTS: u32 = 5;

/// Background patches started for one owner, such as a chart release or a
/// cluster. Finished patches are collected by [`PatchTasks::reap`], which
/// surfaces the first failure.
#[derive(Default)]
pub struct PatchTasks {
    tasks: Vec<(ObjectId, JoinHandle<Result<(), ApiError>>)>,
}

impl PatchTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: ObjectId, task: JoinHandle<Result<(), ApiError>>) {
        self.tasks.push((id, task));
    }

    /// Patches still running.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|(_, t)| !t.is_finished()).count()
    }

    pub async fn reap(&mut self) -> Result<(), ApiError> {
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|(_, t)| t.is_finished());
        self.tasks = running;
        for (id, task) in done {
            match task.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(ApiError::Background {
                        object: id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cancel the patches of objects that are going away.
    pub fn abort_all(&mut self) {
        for (_, task) in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// In-memory object store with monotonically increasing resource versions.
///
/// Cloning is cheap; clones share the same objects.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
    /// Requests still to fail with a transient error.
    injected_failures: Arc<AtomicU32>,
}

#[derive(Default)]
struct StoreInner {
    objects: BTreeMap<String, StoredObject>,
    version: u64,
}

impl StoreInner {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        info!("Opening in-memory state store");
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            injected_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make the next `count` requests fail with [`ApiError::Transient`].
    pub async fn inject_transient_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self, op: &str) -> Result<(), ApiError> {
        let took = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(ApiError::Transient(format!("{} temporarily unavailable", op)));
        }
        Ok(())
    }

    /// Highest resource version handed out so far.
    pub async fn current_version(&self) -> u64 {
        self.inner.read().await.version
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Create or replace an object regardless of its current version.
    pub async fn apply(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> Result<StoredObject, ApiError> {
        let id = ObjectId::new(kind, namespace, name);
        let key = registry_key(&id);
        let mut inner = self.inner.write().await;
        let version = inner.next_version();
        let (uid, created_at) = match inner.objects.get(&key) {
            Some(existing) => (existing.uid.clone(), existing.created_at),
            None => (uuid::Uuid::new_v4().to_string(), Utc::now()),
        };
        let mut body = body;
        stamp_metadata(&mut body, &id, &uid, version)?;
        let object = StoredObject {
            id: id.clone(),
            uid,
            resource_version: version,
            created_at,
            body,
        };
        inner.objects.insert(key, object.clone());
        debug!(object = %id, version, "Applied object");
        Ok(object)
    }

    /// Set fields on an object once `delay` has passed, retrying version
    /// conflicts and transient errors a few times. Stands in for a controller
    /// reconciling the object in the background. An object deleted in the
    /// meantime counts as done.
    pub fn patch_later(
        &self,
        id: ObjectId,
        delay: Duration,
        patch: Vec<(String, Value)>,
    ) -> JoinHandle<Result<(), ApiError>> {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut last_error = None;
            for _ in 0..PATCH_ATTEMPTS {
                let mut object = match store.get(&id).await {
                    Ok(object) => object,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => {
                        last_error = Some(e);
                        continue;
                    }
                };
                for (path, value) in &patch {
                    if let Err(e) = object.set_field(path, value.clone()) {
                        warn!(object = %id, error = %e, "Dropping background patch");
                        return Err(ApiError::Background {
                            object: id.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                match store.update(&object).await {
                    Ok(_) => return Ok(()),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) if e.is_retryable() => last_error = Some(e),
                    Err(e) => {
                        warn!(object = %id, error = %e, "Background patch failed");
                        return Err(ApiError::Background {
                            object: id.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            warn!(object = %id, attempts = PATCH_ATTEMPTS, "Background patch gave up");
            Err(ApiError::Background {
                object: id.to_string(),
                reason: format!(
                    "gave up after {} attempts: {}",
                    PATCH_ATTEMPTS,
                    last_error.map(|e| e.to_string()).unwrap_or_default()
                ),
            })
        })
    }

    /// Drop the finalizers of an object, completing a pending deletion.
    pub async fn remove_finalizers(&self, id: &ObjectId) -> Result<(), ApiError> {
        let mut object = self.get(id).await?;
        object.set_field("metadata.finalizers", json!([]))?;
        self.update(&object).await.map(|_| ())
    }
}

#[async_trait]
impl ObjectApi for StateStore {
    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        filter: &ListFilter,
    ) -> Result<Vec<StoredObject>, ApiError> {
        self.take_failure("list")?;
        let prefix = list_prefix(kind, namespace);
        let inner = self.inner.read().await;
        Ok(inner
            .objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
            .filter(|o| filter.matches(o))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &ObjectId) -> Result<StoredObject, ApiError> {
        self.take_failure("get")?;
        let key = registry_key(id);
        let inner = self.inner.read().await;
        inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn create(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> Result<StoredObject, ApiError> {
        let id = ObjectId::new(kind, namespace, name);
        let key = registry_key(&id);
        self.take_failure("create")?;
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&key) {
            return Err(ApiError::AlreadyExists(id.to_string()));
        }
        let version = inner.next_version();
        let uid = uuid::Uuid::new_v4().to_string();
        let mut body = body;
        stamp_metadata(&mut body, &id, &uid, version)?;
        let object = StoredObject {
            id: id.clone(),
            uid,
            resource_version: version,
            created_at: Utc::now(),
            body,
        };
        inner.objects.insert(key.clone(), object.clone());
        debug!(key = %key, version, "Created object");
        Ok(object)
    }

    async fn update(&self, object: &StoredObject) -> Result<StoredObject, ApiError> {
        let key = registry_key(&object.id);
        self.take_failure("update")?;
        let mut inner = self.inner.write().await;
        let current = inner
            .objects
            .get(&key)
            .ok_or_else(|| ApiError::NotFound(object.id.to_string()))?;
        if current.resource_version != object.resource_version {
            return Err(ApiError::Conflict {
                key,
                given: object.resource_version,
                current: current.resource_version,
            });
        }
        let uid = current.uid.clone();
        let created_at = current.created_at;

        let version = inner.next_version();
        let mut body = object.body.clone();
        stamp_metadata(&mut body, &object.id, &uid, version)?;
        let updated = StoredObject {
            id: object.id.clone(),
            uid,
            resource_version: version,
            created_at,
            body,
        };

        if updated.is_terminating() && updated.finalizers()?.is_empty() {
            inner.objects.remove(&key);
            debug!(key = %key, version, "Finalizers cleared, object removed");
            return Ok(updated);
        }

        inner.objects.insert(key.clone(), updated.clone());
        debug!(key = %key, version, "Updated object");
        Ok(updated)
    }

    async fn delete(&self, id: &ObjectId) -> Result<(), ApiError> {
        let key = registry_key(id);
        self.take_failure("delete")?;
        let mut inner = self.inner.write().await;
        let Some(current) = inner.objects.get(&key) else {
            return Err(ApiError::NotFound(id.to_string()));
        };

        if !current.finalizers()?.is_empty() {
            if current.is_terminating() {
                return Ok(());
            }
            let mut marked = current.clone();
            marked.set_field("metadata.deletionTimestamp", json!(Utc::now().to_rfc3339()))?;
            let version = inner.next_version();
            marked.resource_version = version;
            set_path(&mut marked.body, "metadata.resourceVersion", json!(version.to_string()))?;
            inner.objects.insert(key.clone(), marked);
            debug!(key = %key, version, "Object marked for deletion");
            return Ok(());
        }

        let version = inner.next_version();
        inner.objects.remove(&key);
        debug!(key = %key, version, "Deleted object");
        Ok(())
    }
}
