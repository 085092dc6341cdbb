use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use pkg_classifier::classify::deployment_ready;
use pkg_types::object::{ObjectId, ObjectKind};

use crate::api::{ApiError, ObjectApi};
use crate::client::{PatchTasks, StateStore};

/// Label stamped on every deployment created for a release.
pub const RELEASE_LABEL: &str = "app.kubernetes.io/instance";

/// A chart release to install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub values: Value,
    /// Deployments whose readiness makes the release ready.
    #[serde(default)]
    pub deployments: Vec<String>,
}

impl ChartSpec {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version: String::new(),
            values: Value::Null,
            deployments: Vec::new(),
        }
    }

    pub fn with_deployment(mut self, deployment: &str) -> Self {
        self.deployments.push(deployment.to_string());
        self
    }

    fn deployment_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.deployments
            .iter()
            .map(|d| ObjectId::new(ObjectKind::Deployment, &self.namespace, d))
    }
}

/// Installs charts and reports when their deployments are ready.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    async fn install(&self, spec: &ChartSpec) -> Result<(), ApiError>;

    async fn uninstall(&self, name: &str) -> Result<(), ApiError>;

    /// True once the release exists and every watched deployment is ready.
    async fn is_ready(&self, name: &str) -> Result<bool, ApiError>;
}

struct Release {
    spec: ChartSpec,
    rollouts: PatchTasks,
}

/// Installs releases as deployment objects in a [`StateStore`]. Each
/// deployment becomes ready after `rollout`; a rollout that fails makes
/// [`ChartInstaller::is_ready`] fail.
#[derive(Clone)]
pub struct StoreChartInstaller {
    store: StateStore,
    rollout: Duration,
    releases: Arc<RwLock<BTreeMap<String, Release>>>,
}

impl StoreChartInstaller {
    pub fn new(store: StateStore, rollout: Duration) -> Self {
        Self {
            store,
            rollout,
            releases: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl ChartInstaller for StoreChartInstaller {
    async fn install(&self, spec: &ChartSpec) -> Result<(), ApiError> {
        let mut releases = self.releases.write().await;
        if releases.contains_key(&spec.name) {
            return Err(ApiError::AlreadyExists(format!("release {}", spec.name)));
        }
        let mut rollouts = PatchTasks::new();
        for id in spec.deployment_ids() {
            let body = json!({
                "metadata": {"labels": {RELEASE_LABEL: spec.name}},
                "spec": {"replicas": 1},
                "status": {"readyReplicas": 0, "availableReplicas": 0}
            });
            self.store.create(id.kind, &id.namespace, &id.name, body).await?;
            let task = self.store.patch_later(
                id.clone(),
                self.rollout,
                vec![
                    ("status.readyReplicas".to_string(), json!(1)),
                    ("status.availableReplicas".to_string(), json!(1)),
                ],
            );
            rollouts.push(id, task);
        }
        info!(release = %spec.name, namespace = %spec.namespace, version = %spec.version, "Chart installed");
        releases.insert(
            spec.name.clone(),
            Release {
                spec: spec.clone(),
                rollouts,
            },
        );
        Ok(())
    }

    async fn uninstall(&self, name: &str) -> Result<(), ApiError> {
        let mut releases = self.releases.write().await;
        let mut release = releases
            .remove(name)
            .ok_or_else(|| ApiError::NotFound(format!("release {}", name)))?;
        release.rollouts.abort_all();
        for id in release.spec.deployment_ids() {
            match self.store.delete(&id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        info!(release = %name, "Chart uninstalled");
        Ok(())
    }

    async fn is_ready(&self, name: &str) -> Result<bool, ApiError> {
        let spec = {
            let mut releases = self.releases.write().await;
            let release = releases
                .get_mut(name)
                .ok_or_else(|| ApiError::NotFound(format!("release {}", name)))?;
            release.rollouts.reap().await?;
            release.spec.clone()
        };
        for id in spec.deployment_ids() {
            let observed = self.store.get(&id).await?.observe()?;
            if deployment_ready(&observed).is_some() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
