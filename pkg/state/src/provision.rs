use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use pkg_classifier::NodeRoles;
use pkg_constants::labels::{
    CLUSTER_NAME_LABEL, CONTROL_PLANE_ROLE_LABEL, ETCD_ROLE_LABEL, MACHINE_NAMESPACE,
    MACHINE_POOL_LABEL, WORKER_ROLE_LABEL,
};
use pkg_types::object::{ObjectId, ObjectKind, ObjectState, ObservedObject};

use crate::api::{ApiError, ListFilter, ObjectApi};
use crate::client::{PatchTasks, StateStore};

/// A pool of identically-roled machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePool {
    pub name: String,
    pub quantity: u32,
    #[serde(flatten)]
    pub roles: NodeRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub pools: Vec<MachinePool>,
}

/// A provisioned cluster. `generation` increases on every scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub name: String,
    pub generation: u64,
}

/// Machines to add to (positive) or remove from (negative) one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDelta {
    pub pool: String,
    pub delta: i32,
}

#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn provision(&self, config: &ClusterConfig) -> Result<ClusterHandle, ApiError>;

    async fn scale(&self, handle: &ClusterHandle, delta: &RoleDelta) -> Result<ClusterHandle, ApiError>;

    /// Machines of the cluster that have finished booting.
    async fn ready_nodes(&self, handle: &ClusterHandle) -> Result<Vec<ObservedObject>, ApiError>;
}

struct ClusterRecord {
    config: ClusterConfig,
    generation: u64,
    /// Pool -> names of its live machines, oldest first.
    machines: BTreeMap<String, Vec<String>>,
    next_index: BTreeMap<String, u32>,
    boots: PatchTasks,
}

/// Provisions clusters as machine objects in a [`StateStore`]. Machines
/// start in `Provisioning` and reach `Running` after `boot`. A provision or
/// scale that fails deletes the machines it created.
#[derive(Clone)]
pub struct StoreProvisioner {
    store: StateStore,
    boot: Duration,
    clusters: Arc<RwLock<BTreeMap<String, ClusterRecord>>>,
}

fn machine_body(cluster: &str, pool: &MachinePool) -> Value {
    let mut labels = Map::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), json!(cluster));
    labels.insert(MACHINE_POOL_LABEL.to_string(), json!(pool.name));
    for (set, label) in [
        (pool.roles.etcd, ETCD_ROLE_LABEL),
        (pool.roles.control_plane, CONTROL_PLANE_ROLE_LABEL),
        (pool.roles.worker, WORKER_ROLE_LABEL),
    ] {
        if set {
            labels.insert(label.to_string(), json!("true"));
        }
    }
    json!({
        "metadata": {"labels": labels},
        "spec": {"clusterName": cluster},
        "status": {"phase": "Provisioning"}
    })
}

impl StoreProvisioner {
    pub fn new(store: StateStore, boot: Duration) -> Self {
        Self {
            store,
            boot,
            clusters: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    async fn add_machine(&self, record: &mut ClusterRecord, pool: &MachinePool) -> Result<(), ApiError> {
        let index = record.next_index.entry(pool.name.clone()).or_insert(1);
        let name = format!("{}-{}-{}", record.config.name, pool.name, index);
        *index += 1;

        let created = self
            .store
            .create(
                ObjectKind::Machine,
                MACHINE_NAMESPACE,
                &name,
                machine_body(&record.config.name, pool),
            )
            .await?;
        let boot = self.store.patch_later(
            created.id.clone(),
            self.boot,
            vec![("status.phase".to_string(), json!("Running"))],
        );
        record.boots.push(created.id, boot);
        record.machines.entry(pool.name.clone()).or_default().push(name);
        Ok(())
    }

    /// Delete the newest `count` machines of a pool.
    async fn remove_newest(&self, record: &mut ClusterRecord, pool: &str, count: u32) -> Result<(), ApiError> {
        for _ in 0..count {
            let Some(name) = record.machines.get_mut(pool).and_then(|m| m.pop()) else {
                break;
            };
            let id = ObjectId::new(ObjectKind::Machine, MACHINE_NAMESPACE, &name);
            match self.store.delete(&id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn add_pools(&self, record: &mut ClusterRecord, pools: &[MachinePool]) -> Result<(), ApiError> {
        for pool in pools {
            for _ in 0..pool.quantity {
                self.add_machine(record, pool).await?;
            }
        }
        Ok(())
    }

    /// Remove every machine of a cluster whose provisioning failed.
    async fn teardown(&self, record: &mut ClusterRecord) {
        record.boots.abort_all();
        let pools: Vec<(String, usize)> = record.machines.iter().map(|(p, m)| (p.clone(), m.len())).collect();
        for (pool, count) in pools {
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            if let Err(e) = self.remove_newest(record, &pool, count).await {
                warn!(cluster = %record.config.name, pool = %pool, error = %e, "Failed to remove machine during rollback");
            }
        }
    }
}

#[async_trait]
impl ClusterProvisioner for StoreProvisioner {
    async fn provision(&self, config: &ClusterConfig) -> Result<ClusterHandle, ApiError> {
        let mut clusters = self.clusters.write().await;
        if clusters.contains_key(&config.name) {
            return Err(ApiError::AlreadyExists(format!("cluster {}", config.name)));
        }
        let mut record = ClusterRecord {
            config: config.clone(),
            generation: 1,
            machines: BTreeMap::new(),
            next_index: BTreeMap::new(),
            boots: PatchTasks::new(),
        };
        if let Err(err) = self.add_pools(&mut record, &config.pools).await {
            warn!(cluster = %config.name, error = %err, "Provisioning failed, removing created machines");
            self.teardown(&mut record).await;
            return Err(err);
        }
        info!(cluster = %config.name, pools = config.pools.len(), "Cluster provisioned");
        let handle = ClusterHandle {
            name: config.name.clone(),
            generation: record.generation,
        };
        clusters.insert(config.name.clone(), record);
        Ok(handle)
    }

    async fn scale(&self, handle: &ClusterHandle, delta: &RoleDelta) -> Result<ClusterHandle, ApiError> {
        let mut clusters = self.clusters.write().await;
        let record = clusters
            .get_mut(&handle.name)
            .ok_or_else(|| ApiError::NotFound(format!("cluster {}", handle.name)))?;
        let pool_index = record
            .config
            .pools
            .iter()
            .position(|p| p.name == delta.pool)
            .ok_or_else(|| ApiError::Invalid(format!("cluster {} has no pool '{}'", handle.name, delta.pool)))?;
        let pool = record.config.pools[pool_index].clone();

        let target = i64::from(pool.quantity) + i64::from(delta.delta);
        let target = u32::try_from(target).map_err(|_| {
            ApiError::Invalid(format!(
                "cannot scale pool '{}' of {} machines by {}",
                pool.name, pool.quantity, delta.delta
            ))
        })?;

        let mut added = 0;
        for _ in pool.quantity..target {
            if let Err(err) = self.add_machine(record, &pool).await {
                warn!(cluster = %handle.name, pool = %pool.name, error = %err, "Scale-up failed, removing added machines");
                if let Err(e) = self.remove_newest(record, &pool.name, added).await {
                    warn!(cluster = %handle.name, pool = %pool.name, error = %e, "Failed to remove machine during rollback");
                }
                return Err(err);
            }
            added += 1;
        }
        if target < pool.quantity {
            self.remove_newest(record, &pool.name, pool.quantity - target).await?;
        }

        record.config.pools[pool_index].quantity = target;
        record.generation += 1;
        info!(cluster = %handle.name, pool = %pool.name, from = pool.quantity, to = target, "Cluster scaled");
        Ok(ClusterHandle {
            name: handle.name.clone(),
            generation: record.generation,
        })
    }

    async fn ready_nodes(&self, handle: &ClusterHandle) -> Result<Vec<ObservedObject>, ApiError> {
        {
            let mut clusters = self.clusters.write().await;
            let record = clusters
                .get_mut(&handle.name)
                .ok_or_else(|| ApiError::NotFound(format!("cluster {}", handle.name)))?;
            record.boots.reap().await?;
        }
        let filter = ListFilter::all().field("spec.clusterName", &handle.name);
        let machines = self
            .store
            .list(ObjectKind::Machine, Some(MACHINE_NAMESPACE), &filter)
            .await?;
        let mut ready = Vec::new();
        for machine in machines {
            let observed = machine.observe()?;
            if observed.state == ObjectState::Running {
                ready.push(observed);
            }
        }
        Ok(ready)
    }
}
