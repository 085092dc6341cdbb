//! Machine role labels.

pub const ETCD_ROLE_LABEL: &str = "rke.cattle.io/etcd-role";
pub const CONTROL_PLANE_ROLE_LABEL: &str = "rke.cattle.io/control-plane-role";
pub const WORKER_ROLE_LABEL: &str = "rke.cattle.io/worker-role";

/// Label tying a machine to the cluster it belongs to.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label tying a machine to its machine pool.
pub const MACHINE_POOL_LABEL: &str = "rke.cattle.io/rke-machine-pool-name";

/// Namespace holding provisioned machines.
pub const MACHINE_NAMESPACE: &str = "fleet-default";
