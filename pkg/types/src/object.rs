use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::fields::{self, FieldError};
use crate::pod::ContainerStatus;

// --- Object kind ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Pod,
    DaemonSet,
    Deployment,
    Machine,
    Namespace,
    Project,
    Other,
}

impl ObjectKind {
    /// Lowercase plural used in registry keys (`pods`, `daemonsets`).
    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Pod => "pods",
            ObjectKind::DaemonSet => "daemonsets",
            ObjectKind::Deployment => "deployments",
            ObjectKind::Machine => "machines",
            ObjectKind::Namespace => "namespaces",
            ObjectKind::Project => "projects",
            ObjectKind::Other => "others",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Pod => "Pod",
            ObjectKind::DaemonSet => "DaemonSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Machine => "Machine",
            ObjectKind::Namespace => "Namespace",
            ObjectKind::Project => "Project",
            ObjectKind::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" | "pods" => Ok(ObjectKind::Pod),
            "daemonset" | "daemonsets" | "apps.daemonset" => Ok(ObjectKind::DaemonSet),
            "deployment" | "deployments" | "apps.deployment" => Ok(ObjectKind::Deployment),
            "machine" | "machines" | "cluster.x-k8s.io.machine" => Ok(ObjectKind::Machine),
            "namespace" | "namespaces" => Ok(ObjectKind::Namespace),
            "project" | "projects" => Ok(ObjectKind::Project),
            other => Err(format!("unknown object kind '{}'", other)),
        }
    }
}

// --- Object identity ---

/// `(namespace, name, kind)`. Cluster-scoped objects have an empty namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
    pub kind: ObjectKind,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

// --- Object state ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Ready,
    Deleting,
    Unknown,
    Other(String),
}

impl ObjectState {
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            None | Some("") => ObjectState::Unknown,
            Some("Pending") | Some("Provisioning") => ObjectState::Pending,
            Some("Running") => ObjectState::Running,
            Some("Succeeded") => ObjectState::Succeeded,
            Some("Failed") => ObjectState::Failed,
            Some("Ready") | Some("Active") => ObjectState::Ready,
            Some("Deleting") | Some("Terminating") => ObjectState::Deleting,
            Some("Unknown") => ObjectState::Unknown,
            Some(other) => ObjectState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectState::Pending => write!(f, "Pending"),
            ObjectState::Running => write!(f, "Running"),
            ObjectState::Succeeded => write!(f, "Succeeded"),
            ObjectState::Failed => write!(f, "Failed"),
            ObjectState::Ready => write!(f, "Ready"),
            ObjectState::Deleting => write!(f, "Deleting"),
            ObjectState::Unknown => write!(f, "Unknown"),
            ObjectState::Other(s) => write!(f, "{}", s),
        }
    }
}

// --- Replica counts ---

/// Desired / ready / available counters of a DaemonSet or Deployment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub desired: u64,
    pub ready: u64,
    pub available: u64,
}

impl ReplicaCounts {
    /// DaemonSet counters live entirely under `status`.
    pub fn from_daemonset(value: &Value) -> Result<Self, FieldError> {
        Ok(Self {
            desired: fields::get_u64(value, "status.desiredNumberScheduled")?.unwrap_or(0),
            ready: fields::get_u64(value, "status.numberReady")?.unwrap_or(0),
            available: fields::get_u64(value, "status.numberAvailable")?.unwrap_or(0),
        })
    }

    /// Deployment desired count comes from `spec.replicas` (default 1).
    pub fn from_deployment(value: &Value) -> Result<Self, FieldError> {
        Ok(Self {
            desired: fields::get_u64(value, "spec.replicas")?.unwrap_or(1),
            ready: fields::get_u64(value, "status.readyReplicas")?.unwrap_or(0),
            available: fields::get_u64(value, "status.availableReplicas")?.unwrap_or(0),
        })
    }
}

// --- Observed object ---

/// Snapshot of one remote object taken at a single poll tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedObject {
    pub id: ObjectId,
    pub state: ObjectState,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub replicas: Option<ReplicaCounts>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ObservedObject {
    pub fn new(id: ObjectId, state: ObjectState) -> Self {
        Self {
            id,
            state,
            container_statuses: Vec::new(),
            replicas: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn namespace(&self) -> &str {
        &self.id.namespace
    }

    pub fn kind(&self) -> ObjectKind {
        self.id.kind
    }

    /// Images of every container, in status order.
    pub fn images(&self) -> Vec<String> {
        self.container_statuses
            .iter()
            .filter_map(|c| c.image.clone())
            .collect()
    }

    /// Build a snapshot from an API object in Kubernetes JSON shape.
    ///
    /// `metadata.name` is required; everything else is optional, but any
    /// field present with the wrong type is reported as malformed.
    pub fn from_value(kind: ObjectKind, value: &Value) -> Result<Self, FieldError> {
        let name = fields::require_str(value, "metadata.name")?;
        let namespace = fields::get_str(value, "metadata.namespace")?.unwrap_or_default();
        let mut object = ObservedObject::new(
            ObjectId::new(kind, namespace, name),
            ObjectState::from_phase(fields::get_str(value, "status.phase")?),
        );
        object.labels = fields::get_string_map(value, "metadata.labels")?;
        object.annotations = fields::get_string_map(value, "metadata.annotations")?;

        if let Some(statuses) = fields::get_array(value, "status.containerStatuses")? {
            object.container_statuses = statuses
                .iter()
                .map(ContainerStatus::from_value)
                .collect::<Result<_, _>>()?;
        }

        match kind {
            ObjectKind::DaemonSet => {
                object.replicas = Some(ReplicaCounts::from_daemonset(value)?);
            }
            ObjectKind::Deployment => {
                object.replicas = Some(ReplicaCounts::from_deployment(value)?);
            }
            _ => {}
        }
        Ok(object)
    }
}
