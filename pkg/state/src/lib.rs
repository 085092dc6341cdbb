//! Access to cluster state and the collaborators the verification actions
//! drive: the [`ObjectApi`] with optimistic concurrency, chart installation
//! and cluster provisioning. [`StateStore`] is the in-memory implementation
//! shared by tests and the CLI.

pub mod api;
pub mod charts;
pub mod client;
pub mod provision;

pub use api::{ApiError, ListFilter, ObjectApi, StoredObject};
pub use charts::{ChartInstaller, ChartSpec, StoreChartInstaller};
pub use client::{PatchTasks, StateStore, registry_key};
pub use provision::{ClusterConfig, ClusterHandle, ClusterProvisioner, MachinePool, RoleDelta, StoreProvisioner};
